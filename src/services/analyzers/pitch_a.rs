//! Pitch-A analyzer (C4): per-10 ms f0 + voicing confidence over the violin
//! pitch band, via a YIN-style cumulative-mean-normalized-difference tracker.

use crate::models::rows::{PitchRow, PitchSource};

pub const PITCH_A_SAMPLE_RATE: u32 = 22_050;
const HOP_SAMPLES: usize = 220;
const WINDOW_SAMPLES: usize = 2_048;
const BAND_LO_HZ: f64 = 180.0;
const BAND_HI_HZ: f64 = 4_000.0;
const MIN_CONFIDENCE: f64 = 0.1;
const ABSOLUTE_THRESHOLD: f32 = 0.2;
/// Below this window RMS a window is treated as silence: CMND collapses to
/// all-zero and would otherwise pick `tau_min` with spurious confidence 1.0.
const RMS_FLOOR: f32 = 0.0005;

/// Reusable difference-function scratch buffers, sized once for the fixed
/// pitch band.
pub struct PitchAAnalyzer {
    diff: Vec<f32>,
    cmnd: Vec<f32>,
    tau_min: usize,
    tau_max: usize,
}

impl PitchAAnalyzer {
    pub fn new() -> Self {
        let tau_min = (PITCH_A_SAMPLE_RATE as f64 / BAND_HI_HZ).floor().max(1.0) as usize;
        let tau_max = (PITCH_A_SAMPLE_RATE as f64 / BAND_LO_HZ).ceil() as usize;
        Self {
            diff: vec![0.0; tau_max + 1],
            cmnd: vec![0.0; tau_max + 1],
            tau_min,
            tau_max,
        }
    }

    /// `samples` is a mono float32 buffer at 22.05 kHz spanning one 100 ms
    /// frame. `base_start_ms` is that frame's absolute start. Emits zero or
    /// more 10 ms rows depending on how many full windows fit.
    pub fn analyze(
        &mut self,
        samples: &[f32],
        recording_id: i64,
        frame_no: i64,
        base_start_ms: i64,
    ) -> Vec<PitchRow> {
        let mut rows = Vec::new();
        let mut window_start = 0usize;
        while window_start + WINDOW_SAMPLES <= samples.len() {
            let window = &samples[window_start..window_start + WINDOW_SAMPLES];
            if let Some((hz, confidence)) = self.estimate(window) {
                if hz.is_finite()
                    && hz >= BAND_LO_HZ
                    && hz <= BAND_HI_HZ
                    && confidence >= MIN_CONFIDENCE
                {
                    let start_ms_rel =
                        (window_start as f64 * 1000.0 / PITCH_A_SAMPLE_RATE as f64).round() as i64;
                    let start_ms = base_start_ms + start_ms_rel;
                    rows.push(PitchRow {
                        recording_id,
                        frame_no,
                        start_ms,
                        end_ms: start_ms + 9,
                        source: PitchSource::PitchA,
                        hz,
                        confidence,
                    });
                }
            }
            window_start += HOP_SAMPLES;
        }
        rows
    }

    fn estimate(&mut self, window: &[f32]) -> Option<(f64, f64)> {
        if self.tau_max <= self.tau_min || window.len() <= self.tau_max {
            return None;
        }

        let rms = (window.iter().map(|&s| s * s).sum::<f32>() / window.len() as f32).sqrt();
        if rms < RMS_FLOOR {
            return None;
        }

        let integration_len = window.len() - self.tau_max;
        for tau in 0..=self.tau_max {
            let mut sum = 0.0f32;
            for j in 0..integration_len {
                let d = window[j] - window[j + tau];
                sum += d * d;
            }
            self.diff[tau] = sum;
        }

        self.cmnd[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..=self.tau_max {
            running_sum += self.diff[tau];
            self.cmnd[tau] = self.diff[tau] / (running_sum / tau as f32).max(1e-12);
        }

        let chosen = (self.tau_min..=self.tau_max).find(|&tau| self.cmnd[tau] < ABSOLUTE_THRESHOLD);
        let tau = match chosen {
            Some(tau) => {
                let mut t = tau;
                while t + 1 <= self.tau_max && self.cmnd[t + 1] < self.cmnd[t] {
                    t += 1;
                }
                t
            }
            None => (self.tau_min..=self.tau_max)
                .min_by(|&a, &b| self.cmnd[a].partial_cmp(&self.cmnd[b]).unwrap())?,
        };

        let tau_interp = parabolic_interpolate(&self.cmnd, tau, self.tau_min, self.tau_max);
        if tau_interp <= 0.0 {
            return None;
        }
        let hz = PITCH_A_SAMPLE_RATE as f64 / tau_interp;
        let confidence = (1.0 - self.cmnd[tau] as f64).clamp(0.0, 1.0);
        Some((hz, confidence))
    }
}

impl Default for PitchAAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parabolic interpolation around the chosen minimum for sub-sample lag
/// precision.
fn parabolic_interpolate(cmnd: &[f32], tau: usize, lo: usize, hi: usize) -> f64 {
    if tau <= lo || tau >= hi {
        return tau as f64;
    }
    let (s0, s1, s2) = (cmnd[tau - 1] as f64, cmnd[tau] as f64, cmnd[tau + 1] as f64);
    let denom = s0 - 2.0 * s1 + s2;
    if denom.abs() < 1e-12 {
        return tau as f64;
    }
    tau as f64 + 0.5 * (s0 - s2) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq_hz: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq_hz * i as f32 / PITCH_A_SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn too_short_buffer_yields_no_rows() {
        let mut a = PitchAAnalyzer::new();
        let rows = a.analyze(&vec![0.0f32; 100], 1, 1, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn detects_pitch_near_440hz() {
        let mut a = PitchAAnalyzer::new();
        let samples = sine(440.0, WINDOW_SAMPLES + HOP_SAMPLES * 3);
        let rows = a.analyze(&samples, 1, 1, 0);
        assert!(!rows.is_empty());
        for row in &rows {
            assert!((row.hz - 440.0).abs() < 5.0, "hz={}", row.hz);
            assert!(row.confidence >= MIN_CONFIDENCE);
        }
    }

    #[test]
    fn silence_yields_no_rows() {
        let mut a = PitchAAnalyzer::new();
        let samples = vec![0.0f32; WINDOW_SAMPLES + HOP_SAMPLES * 3];
        let rows = a.analyze(&samples, 1, 1, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn row_end_ms_is_ten_past_start() {
        let mut a = PitchAAnalyzer::new();
        let samples = sine(300.0, WINDOW_SAMPLES);
        let rows = a.analyze(&samples, 1, 2, 100);
        for row in rows {
            assert_eq!(row.end_ms, row.start_ms + 9);
        }
    }
}
