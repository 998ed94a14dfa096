//! Volume analyzer (C7): RMS/dB windows over a 22.05 kHz mono buffer, at
//! three granularities — a per-frame aggregate, a 10 ms series, and an
//! explicit 1 ms series. Purely computational, no shared state.

use crate::models::rows::{Volume10msRow, Volume1msRow, VolumeAggregateRow};

pub const VOLUME_SAMPLE_RATE: u32 = 22_050;
const SILENCE_FLOOR: f64 = 1e-6;

fn rms(window: &[f32]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / window.len() as f64).sqrt()
}

fn to_db(rms: f64) -> f64 {
    20.0 * (rms + SILENCE_FLOOR).log10()
}

/// Windowed RMS at `hop`/`window = 2*hop` samples, `center = false` so the
/// first window aligns to the buffer's absolute start.
fn windowed_rms(samples: &[f32], hop: usize, window: usize) -> Vec<(usize, f64)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    while start + window <= samples.len() {
        out.push((start, rms(&samples[start..start + window])));
        start += hop;
    }
    out
}

/// One summary row per frame: the mean of the 1 ms-hop RMS windows spanning
/// the frame, and its corresponding dB.
pub fn volume_aggregate(
    samples: &[f32],
    recording_id: i64,
    frame_no: i64,
    start_ms: i64,
    sample_rate: u32,
) -> Option<VolumeAggregateRow> {
    let hop = (sample_rate as f64 * 0.001).round().max(1.0) as usize;
    let window = 2 * hop;
    let windows = windowed_rms(samples, hop, window);
    if windows.is_empty() {
        return None;
    }
    let mean_rms = windows.iter().map(|(_, r)| r).sum::<f64>() / windows.len() as f64;
    Some(VolumeAggregateRow {
        recording_id,
        chunk_no: frame_no,
        start_ms,
        rms: mean_rms,
        db: to_db(mean_rms),
    })
}

/// One row per 10 ms window, with absolute start/end ms.
pub fn volume_10ms_series(
    samples: &[f32],
    recording_id: i64,
    frame_no: i64,
    base_start_ms: i64,
    sample_rate: u32,
) -> Vec<Volume10msRow> {
    let hop = (sample_rate as f64 * 0.010).round().max(1.0) as usize;
    let window = 2 * hop;
    windowed_rms(samples, hop, window)
        .into_iter()
        .map(|(offset, rms)| {
            let start_ms_rel = (offset as f64 * 1000.0 / sample_rate as f64).round() as i64;
            let start_ms = base_start_ms + start_ms_rel;
            Volume10msRow {
                recording_id,
                frame_no,
                start_ms,
                end_ms: start_ms + 9,
                rms,
                db: to_db(rms),
                sample_rate: sample_rate as i32,
            }
        })
        .collect()
}

/// One row per 1 ms window. No `end_ms`: each row addresses a single sample
/// instant. Only computed when the caller explicitly requests the 1 ms
/// series, separately from the per-frame aggregate.
pub fn volume_1ms_series(
    samples: &[f32],
    recording_id: i64,
    frame_no: i64,
    base_start_ms: i64,
    sample_rate: u32,
) -> Vec<Volume1msRow> {
    let hop = (sample_rate as f64 * 0.001).round().max(1.0) as usize;
    let window = 2 * hop;
    windowed_rms(samples, hop, window)
        .into_iter()
        .map(|(offset, rms)| {
            let start_ms_rel = (offset as f64 * 1000.0 / sample_rate as f64).round() as i64;
            Volume1msRow {
                recording_id,
                frame_no,
                start_ms: base_start_ms + start_ms_rel,
                rms,
                db: to_db(rms),
                sample_rate: sample_rate as i32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_scale_buffer(len: usize) -> Vec<f32> {
        (0..len).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect()
    }

    #[test]
    fn rms_of_full_scale_square_wave_is_near_one() {
        assert!((rms(&full_scale_buffer(4000)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn silence_yields_floor_db() {
        let samples = vec![0.0f32; 4000];
        let row = volume_aggregate(&samples, 1, 1, 0, VOLUME_SAMPLE_RATE).unwrap();
        assert_eq!(row.rms, 0.0);
        assert!((row.db - to_db(0.0)).abs() < 1e-9);
        assert!(row.db < -100.0);
    }

    #[test]
    fn aggregate_is_none_for_buffer_shorter_than_one_window() {
        assert!(volume_aggregate(&[0.0f32; 10], 1, 1, 0, VOLUME_SAMPLE_RATE).is_none());
    }

    #[test]
    fn ten_ms_series_rows_are_contiguous_ten_ms_apart() {
        let samples = full_scale_buffer(VOLUME_SAMPLE_RATE as usize / 10 * 3);
        let rows = volume_10ms_series(&samples, 1, 1, 500, VOLUME_SAMPLE_RATE);
        assert!(rows.len() >= 2);
        for pair in rows.windows(2) {
            assert_eq!(pair[1].start_ms - pair[0].start_ms, 10);
        }
        assert_eq!(rows[0].end_ms, rows[0].start_ms + 9);
    }

    #[test]
    fn one_ms_series_has_no_end_ms_field() {
        let samples = full_scale_buffer(500);
        let rows = volume_1ms_series(&samples, 1, 1, 0, VOLUME_SAMPLE_RATE);
        assert!(!rows.is_empty());
        // Volume1msRow has no end_ms by construction; this just exercises the call.
        assert!(rows[0].start_ms >= 0);
    }
}
