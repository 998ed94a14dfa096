//! Onset/Note analyzer (C6): delegates transcription to an external HTTP
//! microservice and maps its response into note rows tagged `ONS`.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::rows::NoteRow;

#[derive(Debug, Clone)]
pub struct OnsetClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    notes: Vec<NoteEvent>,
}

#[derive(Debug, Deserialize)]
struct NoteEvent {
    onset_sec: f64,
    offset_sec: f64,
    pitch_midi: i32,
    velocity: i32,
}

impl OnsetClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("http://{host}:{port}"),
        }
    }

    /// Posts `wav_bytes` (mono, 16 kHz or 44.1 kHz) to the onset/note
    /// service and maps its response onto absolute times. Never returns an
    /// error: non-2xx responses and malformed JSON downgrade to zero rows,
    /// logged as a warning, with no retry at this layer.
    pub async fn transcribe(
        &self,
        wav_bytes: Vec<u8>,
        recording_id: i64,
        frame_no: i64,
        chunk_start_ms: i64,
    ) -> Vec<NoteRow> {
        match self.transcribe_inner(wav_bytes).await {
            Ok(notes) => notes
                .into_iter()
                .map(|n| NoteRow {
                    recording_id,
                    frame_no,
                    start_ms: chunk_start_ms + (n.onset_sec * 1000.0).round() as i64,
                    end_ms: chunk_start_ms + (n.offset_sec * 1000.0).round() as i64,
                    midi_pitch: n.pitch_midi,
                    midi_velocity: n.velocity,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(frame_no, error = %e, "onset/note service call failed, emitting no rows");
                Vec::new()
            }
        }
    }

    async fn transcribe_inner(&self, wav_bytes: Vec<u8>) -> Result<Vec<NoteEvent>> {
        let url = format!("{}/transcribe", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "audio/wav")
            .body(wav_bytes)
            .send()
            .await
            .map_err(AppError::NoteService)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Analyzer {
                analyzer: "onset",
                message: format!("service returned {status}: {body}"),
            });
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Analyzer { analyzer: "onset", message: e.to_string() })?;

        Ok(parsed.notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_json_parses_note_events() {
        let body = r#"{"notes":[
            {"onset_sec": 0.12, "offset_sec": 0.45, "pitch_midi": 67, "velocity": 80},
            {"onset_sec": 0.50, "offset_sec": 0.90, "pitch_midi": 69, "velocity": 64}
        ]}"#;
        let parsed: TranscribeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.notes.len(), 2);
        assert_eq!(parsed.notes[0].pitch_midi, 67);
        assert_eq!(parsed.notes[1].velocity, 64);
    }

    #[test]
    fn empty_notes_array_parses_to_empty_vec() {
        let parsed: TranscribeResponse = serde_json::from_str(r#"{"notes":[]}"#).unwrap();
        assert!(parsed.notes.is_empty());
    }

    #[test]
    fn onset_and_offset_seconds_map_to_absolute_milliseconds() {
        let event = NoteEvent { onset_sec: 0.123, offset_sec: 0.456, pitch_midi: 60, velocity: 100 };
        let chunk_start_ms = 2_000i64;
        let start_ms = chunk_start_ms + (event.onset_sec * 1000.0).round() as i64;
        let end_ms = chunk_start_ms + (event.offset_sec * 1000.0).round() as i64;
        assert_eq!(start_ms, 2123);
        assert_eq!(end_ms, 2456);
    }
}
