use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, RecordingId, SessionId};
use crate::models::frame::FrameEncoding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Start,
    Frame,
    Stop,
}

/// One inbound datum from the client channel, held in the Recording State
/// Store until its scanner-dispatched handler has finished with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub kind: MessageKind,
    pub recording_id: Option<RecordingId>,
    pub audio_frame_no: Option<i64>,
    pub received_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub process_started_at: Option<DateTime<Utc>>,
    pub encoding: Option<FrameEncoding>,
    pub bytes: Option<Vec<u8>>,
}

impl Message {
    pub fn new(
        id: MessageId,
        session_id: SessionId,
        kind: MessageKind,
        recording_id: Option<RecordingId>,
        audio_frame_no: Option<i64>,
    ) -> Self {
        Self {
            id,
            session_id,
            kind,
            recording_id,
            audio_frame_no,
            received_at: Utc::now(),
            queued_at: None,
            process_started_at: None,
            encoding: None,
            bytes: None,
        }
    }

    /// Attach a FRAME message's payload bytes and the encoding they arrived
    /// in. Scanner 3B normalizes `bytes` to raw PCM16 according to `encoding`.
    pub fn with_payload(mut self, encoding: FrameEncoding, bytes: Vec<u8>) -> Self {
        self.encoding = Some(encoding);
        self.bytes = Some(bytes);
        self
    }
}
