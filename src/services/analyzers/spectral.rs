//! Spectral analyzer (C3): one 100 ms windowed magnitude spectrum per frame,
//! bucketed over the violin-relevant range and max-normalized.

use std::borrow::Cow;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::models::rows::SpectralRow;
use crate::services::resampler::resample;

/// This analyzer always runs its FFT at 16 kHz: sufficient Nyquist for
/// violin partials, and a quarter the FFT cost of 44.1 kHz.
pub const SPECTRAL_SAMPLE_RATE: u32 = 16_000;
const WINDOW_SAMPLES: usize = SPECTRAL_SAMPLE_RATE as usize / 10;
const BUCKET_LO: usize = 18;
const BUCKET_HI: usize = 400;

/// Holds the FFT plan and scratch buffers so a tick's worth of frames can be
/// analyzed without reallocating.
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    magnitude: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(WINDOW_SAMPLES);
        Self {
            fft,
            window: hann_window(WINDOW_SAMPLES),
            scratch: vec![Complex::new(0.0, 0.0); WINDOW_SAMPLES],
            magnitude: vec![0.0; WINDOW_SAMPLES / 2 + 1],
        }
    }

    /// `samples` is a mono float32 buffer spanning one 100 ms frame at
    /// `sample_rate`. Returns one row per FFT bin in `[18, 400]`.
    pub fn analyze(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        recording_id: i64,
        frame_no: i64,
    ) -> Vec<SpectralRow> {
        let samples: Cow<[f32]> = if sample_rate == SPECTRAL_SAMPLE_RATE {
            Cow::Borrowed(samples)
        } else {
            Cow::Owned(resample(samples, sample_rate, SPECTRAL_SAMPLE_RATE))
        };

        if samples.len() < WINDOW_SAMPLES {
            tracing::warn!(frame_no, len = samples.len(), "spectral window too short, skipping");
            return Vec::new();
        }

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            *slot = Complex::new(samples[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let half = WINDOW_SAMPLES / 2 + 1;
        let mut max_mag = 0.0f32;
        for (i, slot) in self.magnitude.iter_mut().enumerate() {
            let m = self.scratch[i].norm();
            *slot = m;
            if m > max_mag {
                max_mag = m;
            }
        }
        if max_mag <= 0.0 {
            max_mag = 1.0;
        }

        let sr = SPECTRAL_SAMPLE_RATE as f64;
        let n = WINDOW_SAMPLES as f64;
        let start_ms = 100 * (frame_no - 1);
        let end_ms = start_ms + 99;
        let hi = BUCKET_HI.min(half.saturating_sub(1));

        (BUCKET_LO..=hi)
            .map(|bucket| SpectralRow {
                recording_id,
                frame_no,
                start_ms,
                end_ms,
                bucket_no: bucket as i64,
                hz_lo: bucket as f64 * sr / n,
                hz_hi: (bucket + 1) as f64 * sr / n,
                bucket_width_hz: sr / n,
                magnitude: self.magnitude[bucket] / max_mag,
                sample_rate: SPECTRAL_SAMPLE_RATE as i32,
            })
            .collect()
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn too_short_buffer_yields_no_rows() {
        let mut a = SpectralAnalyzer::new();
        let rows = a.analyze(&vec![0.0f32; 10], SPECTRAL_SAMPLE_RATE, 1, 1);
        assert!(rows.is_empty());
    }

    #[test]
    fn emits_one_row_per_bucket_in_range() {
        let mut a = SpectralAnalyzer::new();
        let samples = vec![0.0f32; WINDOW_SAMPLES];
        let rows = a.analyze(&samples, SPECTRAL_SAMPLE_RATE, 7, 3);
        assert_eq!(rows.len(), BUCKET_HI - BUCKET_LO + 1);
        assert_eq!(rows[0].bucket_no, BUCKET_LO as i64);
        assert_eq!(rows.last().unwrap().bucket_no, BUCKET_HI as i64);
    }

    #[test]
    fn absolute_times_derive_from_frame_no() {
        let mut a = SpectralAnalyzer::new();
        let samples = vec![0.0f32; WINDOW_SAMPLES];
        let rows = a.analyze(&samples, SPECTRAL_SAMPLE_RATE, 1, 5);
        assert_eq!(rows[0].start_ms, 400);
        assert_eq!(rows[0].end_ms, 499);
    }

    #[test]
    fn magnitude_is_max_normalized() {
        let mut a = SpectralAnalyzer::new();
        let freq_hz = 440.0f32;
        let samples: Vec<f32> = (0..WINDOW_SAMPLES)
            .map(|i| (2.0 * PI * freq_hz * i as f32 / SPECTRAL_SAMPLE_RATE as f32).sin())
            .collect();
        let rows = a.analyze(&samples, SPECTRAL_SAMPLE_RATE, 1, 1);
        let peak = rows.iter().map(|r| r.magnitude).fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 1e-4);
        assert!(rows.iter().all(|r| r.magnitude <= 1.0 + 1e-6));
    }

    #[test]
    fn downsamples_when_input_rate_differs() {
        let mut a = SpectralAnalyzer::new();
        let samples = vec![0.0f32; WINDOW_SAMPLES * 2];
        let rows = a.analyze(&samples, SPECTRAL_SAMPLE_RATE * 2, 1, 1);
        assert!(!rows.is_empty());
    }
}
