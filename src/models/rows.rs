use serde::{Deserialize, Serialize};

use super::RecordingId;

/// One FFT bucket of a single 100 ms spectral window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectralRow {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub bucket_no: i64,
    pub hz_lo: f64,
    pub hz_hi: f64,
    pub bucket_width_hz: f64,
    pub magnitude: f32,
    pub sample_rate: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum PitchSource {
    #[sqlx(rename = "PITCH_A")]
    PitchA,
    #[sqlx(rename = "PITCH_B")]
    PitchB,
}

impl PitchSource {
    pub fn as_tag(self) -> &'static str {
        match self {
            PitchSource::PitchA => "PITCH_A",
            PitchSource::PitchB => "PITCH_B",
        }
    }
}

/// A single pitch estimate row, shared by both pitch analyzers and
/// discriminated by `source`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PitchRow {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub source: PitchSource,
    pub hz: f64,
    pub confidence: f64,
}

/// A single note event from the onset/note microservice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoteRow {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub midi_pitch: i32,
    pub midi_velocity: i32,
}

/// Per-frame 1 ms volume summary: the mean RMS/dB over the whole frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeAggregateRow {
    pub recording_id: RecordingId,
    pub chunk_no: i64,
    pub start_ms: i64,
    pub rms: f64,
    pub db: f64,
}

/// One row of the 10 ms volume series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Volume10msRow {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub rms: f64,
    pub db: f64,
    pub sample_rate: i32,
}

/// One row of the 1 ms volume series. Has no `end_ms`: each row addresses a
/// single sample instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Volume1msRow {
    pub recording_id: RecordingId,
    pub frame_no: i64,
    pub start_ms: i64,
    pub rms: f64,
    pub db: f64,
    pub sample_rate: i32,
}

/// Base recording parameters returned by `engine_load_recording_params`,
/// the first of the two stored-procedure calls Scanner 3A makes on START.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordingBaseParamsRow {
    pub mode: String,
    pub violinist_id: i64,
    pub output_file_name: String,
}

/// Analyzer enable flags returned by whichever mode-specific stored
/// procedure Scanner 3A calls second: `engine_load_compose_params` for
/// COMPOSE, `engine_load_play_practice_params` for PLAY/PRACTICE.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct RecordingAnalyzerParamsRow {
    pub run_spectral: bool,
    pub run_pitch_a: bool,
    pub run_pitch_b: bool,
    pub run_onset: bool,
    pub run_volume: bool,
}

/// Row emitted for [`crate::services::metadata_log`]: one per pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogRow {
    pub dt_added: chrono::DateTime<chrono::Utc>,
    pub step_name: String,
    pub function_name: String,
    pub file_name: String,
    pub recording_id: Option<RecordingId>,
    pub audio_chunk_no: Option<i64>,
    pub frame_no: Option<i64>,
}
