use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordingId;
use crate::models::recording::AnalyzerFlags;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameEncoding {
    Raw,
    Base64,
    Hex,
}

/// A client-sized opaque byte payload, addressed by (recording id, client
/// sequence number). Consumed by the Frame Aligner and then dropped; only
/// its metadata row persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreSplitFrame {
    pub recording_id: RecordingId,
    pub client_frame_no: i64,
    pub size_bytes: usize,
    pub encoding: FrameEncoding,
    pub digest: String,
    pub received_at: DateTime<Utc>,
    pub paired_at: Option<DateTime<Utc>>,
    pub split_at: Option<DateTime<Utc>>,
    pub bytes: Vec<u8>,
}

/// Durable metadata for one exact 100 ms split frame. Mirrors the stamp set
/// a diagnostic dashboard would chart: one timestamp per pipeline
/// transition, plus per-analyzer start/end and row counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitFrameMeta {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub size_bytes: usize,
    pub encoding: FrameEncoding,
    pub digest: String,
    pub flags: AnalyzerFlags,
    pub is_short_final_frame: bool,

    pub dt_received: DateTime<Utc>,
    pub dt_resample_start: Option<DateTime<Utc>>,
    pub dt_resample_end: Option<DateTime<Utc>>,
    pub dt_processing_queued_to_start: Option<DateTime<Utc>>,
    pub dt_processing_start: Option<DateTime<Utc>>,
    pub dt_processing_end: Option<DateTime<Utc>>,

    pub dt_start_spectral: Option<DateTime<Utc>>,
    pub dt_end_spectral: Option<DateTime<Utc>>,
    pub dt_start_pitch_a: Option<DateTime<Utc>>,
    pub dt_end_pitch_a: Option<DateTime<Utc>>,
    pub dt_start_pitch_b: Option<DateTime<Utc>>,
    pub dt_end_pitch_b: Option<DateTime<Utc>>,
    pub dt_start_onset: Option<DateTime<Utc>>,
    pub dt_end_onset: Option<DateTime<Utc>>,
    pub dt_start_volume: Option<DateTime<Utc>>,
    pub dt_end_volume: Option<DateTime<Utc>>,

    pub spectral_record_cnt: u32,
    pub pitch_a_record_cnt: u32,
    pub pitch_b_record_cnt: u32,
    pub onset_record_cnt: u32,
    pub volume_10ms_record_cnt: u32,
    pub volume_1ms_record_cnt: u32,
}

impl SplitFrameMeta {
    pub fn new(
        recording_id: RecordingId,
        frame_no: i64,
        size_bytes: usize,
        encoding: FrameEncoding,
        digest: String,
        flags: AnalyzerFlags,
        is_short_final_frame: bool,
    ) -> Self {
        Self {
            recording_id,
            frame_no,
            size_bytes,
            encoding,
            digest,
            flags,
            is_short_final_frame,
            dt_received: Utc::now(),
            dt_resample_start: None,
            dt_resample_end: None,
            dt_processing_queued_to_start: None,
            dt_processing_start: None,
            dt_processing_end: None,
            dt_start_spectral: None,
            dt_end_spectral: None,
            dt_start_pitch_a: None,
            dt_end_pitch_a: None,
            dt_start_pitch_b: None,
            dt_end_pitch_b: None,
            dt_start_onset: None,
            dt_end_onset: None,
            dt_start_volume: None,
            dt_end_volume: None,
            spectral_record_cnt: 0,
            pitch_a_record_cnt: 0,
            pitch_b_record_cnt: 0,
            onset_record_cnt: 0,
            volume_10ms_record_cnt: 0,
            volume_1ms_record_cnt: 0,
        }
    }

    /// A frame is `analyzed` once every analyzer enabled by `flags` has
    /// stamped an end time.
    pub fn is_fully_analyzed(&self) -> bool {
        (!self.flags.run_spectral || self.dt_end_spectral.is_some())
            && (!self.flags.run_pitch_a || self.dt_end_pitch_a.is_some())
            && (!self.flags.run_pitch_b || self.dt_end_pitch_b.is_some())
            && (!self.flags.run_onset || self.dt_end_onset.is_some())
            && (!self.flags.run_volume || self.dt_end_volume.is_some())
    }

    pub fn start_ms(&self) -> i64 {
        100 * (self.frame_no - 1)
    }

    pub fn end_ms(&self) -> i64 {
        self.start_ms() + 99
    }
}

/// Volatile, memory-only payload for a split frame: the raw PCM16 bytes and
/// the two resampled float32 views consumed by the analyzers. Released once
/// [`SplitFrameMeta::is_fully_analyzed`] is true.
#[derive(Debug, Clone, Default)]
pub struct SplitFramePayload {
    pub raw_pcm16_44100: Vec<u8>,
    pub audio_22050: Vec<f32>,
    pub audio_16000: Vec<f32>,
}
