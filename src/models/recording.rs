use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordingId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingMode {
    Compose,
    Play,
    Practice,
}

impl RecordingMode {
    /// Parses the mode text returned by `engine_load_recording_params`,
    /// which is a bare SQL text value rather than JSON, so serde's
    /// `SCREAMING_SNAKE_CASE` deserializer doesn't apply.
    pub fn parse_loose(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "COMPOSE" => RecordingMode::Compose,
            "PLAY" => RecordingMode::Play,
            _ => RecordingMode::Practice,
        }
    }
}

/// Analyzer enable flags decided at START and immutable for the life of the
/// recording.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyzerFlags {
    pub run_spectral: bool,
    pub run_pitch_a: bool,
    pub run_pitch_b: bool,
    pub run_onset: bool,
    pub run_volume: bool,
}

impl Default for AnalyzerFlags {
    fn default() -> Self {
        Self {
            run_spectral: true,
            run_pitch_a: true,
            run_pitch_b: true,
            run_onset: false,
            run_volume: true,
        }
    }
}

/// Per-recording configuration, loaded at START and held for the recording's
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub id: RecordingId,
    pub mode: RecordingMode,
    pub violinist_id: i64,
    pub output_file_name: String,
    pub frame_ms_base: i64,
    pub flags: AnalyzerFlags,
    pub total_bytes_received: u64,
    pub total_split_frames_produced: u64,
    pub created_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl RecordingConfig {
    pub fn new(
        id: RecordingId,
        mode: RecordingMode,
        violinist_id: i64,
        output_file_name: String,
        flags: AnalyzerFlags,
    ) -> Self {
        Self {
            id,
            mode,
            violinist_id,
            output_file_name,
            frame_ms_base: 100,
            flags,
            total_bytes_received: 0,
            total_split_frames_produced: 0,
            created_at: Utc::now(),
            stopped_at: None,
        }
    }

    pub fn mark_stopped(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Utc::now());
        }
    }
}
