//! Pitch-B analyzer (C5): per-10 ms f0 + periodicity via a pre-trained
//! neural pitch model (CREPE-style, 360 pitch bins over 20-cent steps).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::error::{AppError, Result};
use crate::models::rows::{PitchRow, PitchSource};

pub const PITCH_B_SAMPLE_RATE: u32 = 16_000;
const MODEL_INPUT_SAMPLES: usize = 1_024;
const HOP_SAMPLES: usize = 160;
const N_BINS: usize = 360;
const CENTS_PER_BIN: f64 = 20.0;
const CENTS_MIN: f64 = 1997.379_408_437_619_1;
const DECODE_HALF_WIDTH: usize = 4;

/// Round-robin pool of loaded sessions so concurrent frame analyses don't
/// serialize on a single model instance.
struct SessionPool {
    sessions: Vec<tokio::sync::Mutex<Session>>,
    next_idx: AtomicUsize,
}

impl SessionPool {
    fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: sessions.into_iter().map(tokio::sync::Mutex::new).collect(),
            next_idx: AtomicUsize::new(0),
        }
    }

    async fn get(&self) -> tokio::sync::MutexGuard<'_, Session> {
        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        self.sessions[idx].lock().await
    }
}

pub struct PitchBAnalyzer {
    pool: Arc<SessionPool>,
}

impl PitchBAnalyzer {
    /// Loads `pool_size` independent sessions of the same ONNX model so the
    /// orchestrator's worker pool can run several frames' inference
    /// concurrently without lock contention on one session.
    pub fn load(model_path: &Path, pool_size: usize) -> Result<Self> {
        let pool_size = pool_size.max(1);
        let cores = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4);
        let threads_per_session = (cores / pool_size).max(1);

        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::Config(format!("pitch model session builder: {e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::Config(format!("pitch model optimization level: {e}")))?
                .with_intra_threads(threads_per_session)
                .map_err(|e| AppError::Config(format!("pitch model thread count: {e}")))?
                .commit_from_file(model_path)
                .map_err(|e| AppError::Config(format!("loading pitch model {model_path:?}: {e}")))?;
            sessions.push(session);
        }

        Ok(Self { pool: Arc::new(SessionPool::new(sessions)) })
    }

    /// Runs one throwaway inference so the first real frame doesn't pay the
    /// model's one-time warmup cost.
    pub async fn prewarm(&self) -> Result<()> {
        let synthetic = vec![0.0f32; MODEL_INPUT_SAMPLES];
        self.infer_window(&synthetic).await.map(|_| ())
    }

    /// `samples` is a mono float32 buffer at 16 kHz spanning one 100 ms
    /// frame. `base_start_ms` is that frame's absolute start.
    pub async fn analyze(
        &self,
        samples: &[f32],
        recording_id: i64,
        frame_no: i64,
        base_start_ms: i64,
    ) -> Vec<PitchRow> {
        let mut rows = Vec::new();
        let mut window_start = 0usize;
        while window_start + MODEL_INPUT_SAMPLES <= samples.len() {
            let window = &samples[window_start..window_start + MODEL_INPUT_SAMPLES];
            match self.infer_window(window).await {
                Ok(Some((hz, confidence))) if hz.is_finite() && hz > 0.0 => {
                    let start_ms_rel =
                        (window_start as f64 * 1000.0 / PITCH_B_SAMPLE_RATE as f64).round() as i64;
                    let start_ms = base_start_ms + start_ms_rel;
                    rows.push(PitchRow {
                        recording_id,
                        frame_no,
                        start_ms,
                        end_ms: start_ms + 9,
                        source: PitchSource::PitchB,
                        hz,
                        confidence,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(frame_no, error = %e, "pitch-b inference failed, skipping window");
                }
            }
            window_start += HOP_SAMPLES;
        }
        rows
    }

    async fn infer_window(&self, window: &[f32]) -> Result<Option<(f64, f64)>> {
        let normalized = normalize_window(window);
        let input = Array2::from_shape_vec((1, MODEL_INPUT_SAMPLES), normalized)
            .map_err(|e| AppError::Analyzer { analyzer: "pitch_b", message: e.to_string() })?;
        let tensor = Tensor::from_array(input)
            .map_err(|e| AppError::Analyzer { analyzer: "pitch_b", message: e.to_string() })?;

        let mut session = self.pool.get().await;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| AppError::Analyzer { analyzer: "pitch_b", message: e.to_string() })?;

        let (_, output) = outputs
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Analyzer { analyzer: "pitch_b", message: "no model output".into() })?;
        let (_, probs) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Analyzer { analyzer: "pitch_b", message: e.to_string() })?;

        Ok(decode_bins(probs))
    }
}

/// Per-window zero-mean, unit-variance normalization, as the model was
/// trained to expect.
fn normalize_window(window: &[f32]) -> Vec<f32> {
    let n = window.len() as f32;
    let mean = window.iter().sum::<f32>() / n;
    let variance = window.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt().max(1e-8);
    window.iter().map(|s| (s - mean) / std).collect()
}

/// Argmax with a local weighted average over neighboring bins for
/// sub-bin precision. Full-sequence Viterbi decoding needs cross-frame
/// state this per-frame analyzer doesn't keep; this is the documented
/// argmax fallback path.
fn decode_bins(probs: &[f32]) -> Option<(f64, f64)> {
    if probs.len() != N_BINS {
        return None;
    }
    let (best_idx, &best_val) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;

    let lo = best_idx.saturating_sub(DECODE_HALF_WIDTH);
    let hi = (best_idx + DECODE_HALF_WIDTH).min(N_BINS - 1);
    let mut weighted_cents = 0.0f64;
    let mut weight_sum = 0.0f64;
    for (i, &p) in probs.iter().enumerate().take(hi + 1).skip(lo) {
        let w = p as f64;
        let cents = CENTS_MIN + i as f64 * CENTS_PER_BIN;
        weighted_cents += w * cents;
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return None;
    }

    let cents = weighted_cents / weight_sum;
    let hz = 10.0 * 2f64.powf(cents / 1200.0);
    Some((hz, best_val as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bins_peaked_at(idx: usize) -> Vec<f32> {
        let mut probs = vec![0.0f32; N_BINS];
        probs[idx] = 0.9;
        if idx > 0 {
            probs[idx - 1] = 0.05;
        }
        if idx + 1 < N_BINS {
            probs[idx + 1] = 0.05;
        }
        probs
    }

    #[test]
    fn decode_rejects_wrong_bin_count() {
        assert!(decode_bins(&[0.0; 10]).is_none());
    }

    #[test]
    fn decode_peak_near_bin_zero_yields_low_frequency() {
        let probs = bins_peaked_at(0);
        let (hz, confidence) = decode_bins(&probs).unwrap();
        assert!(hz > 30.0 && hz < 35.0, "hz={hz}");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decode_peak_shifts_frequency_with_bin_index() {
        let (hz_low, _) = decode_bins(&bins_peaked_at(50)).unwrap();
        let (hz_high, _) = decode_bins(&bins_peaked_at(200)).unwrap();
        assert!(hz_high > hz_low);
    }

    #[test]
    fn normalize_window_has_zero_mean() {
        let window = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let normalized = normalize_window(&window);
        let mean: f32 = normalized.iter().sum::<f32>() / normalized.len() as f32;
        assert!(mean.abs() < 1e-5);
    }

    #[test]
    fn all_zero_bins_yield_no_estimate() {
        assert!(decode_bins(&vec![0.0f32; N_BINS]).is_none());
    }
}
