//! Recording State Store (C9).
//!
//! Owns every per-recording in-memory map described in the data model:
//! configuration, the frame aligner, pre-split frame metadata, and split
//! frame metadata/payload. All mutation is confined to handler tasks;
//! scanners only read snapshots and defer mutation back to the handlers
//! they dispatch. Readers always look up by recording id first, then by a
//! secondary key (frame no / message id), matching the ownership rule in
//! the data model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::frame::{FrameEncoding, PreSplitFrame, SplitFrameMeta, SplitFramePayload};
use crate::models::message::{Message, MessageKind};
use crate::models::recording::RecordingConfig;
use crate::models::session::Session;
use crate::models::{MessageId, RecordingId, SessionId};
use crate::services::frame_aligner::FrameAligner;

/// How many out-of-order client frame numbers a recording remembers as
/// "missing" before the oldest gap is dropped from the ACK payload.
const MAX_TRACKED_GAPS: usize = 16;

struct RecordingEntry {
    config: RecordingConfig,
    aligner: FrameAligner,
    pre_split: HashMap<i64, PreSplitFrame>,
    split_meta: HashMap<i64, SplitFrameMeta>,
    split_payload: HashMap<i64, SplitFramePayload>,
    last_client_frame_no: i64,
    missing_client_frame_nos: Vec<i64>,
}

impl RecordingEntry {
    fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            aligner: FrameAligner::new(),
            pre_split: HashMap::new(),
            split_meta: HashMap::new(),
            split_payload: HashMap::new(),
            last_client_frame_no: 0,
            missing_client_frame_nos: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct RecordingStateStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    messages: RwLock<HashMap<MessageId, Message>>,
    recordings: RwLock<HashMap<RecordingId, RecordingEntry>>,
    next_session_id: AtomicI64,
    next_message_id: AtomicI64,
}

/// Outcome of recording a client FRAME message's sequence number against a
/// recording's tracked numbering.
pub struct ClientFrameAck {
    pub accepted: bool,
    pub next_expected_frame_no: i64,
    pub missing_frames: Vec<i64>,
}

impl RecordingStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Sessions -----------------------------------------------------

    pub async fn accept_session(&self, peer_addr: Option<String>, headers: Vec<(String, String)>) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Session::new(id, peer_addr, headers);
        self.sessions.write().await.insert(id, session);
        id
    }

    pub async fn close_session(&self, id: SessionId) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.close();
        }
    }

    pub async fn remove_session(&self, id: SessionId) {
        self.sessions.write().await.remove(&id);
    }

    // ---- Messages -------------------------------------------------------

    /// C10 deposits a parsed message here; returns its assigned id.
    pub async fn enqueue_message(
        &self,
        session_id: SessionId,
        kind: MessageKind,
        recording_id: Option<RecordingId>,
        audio_frame_no: Option<i64>,
        payload: Option<(FrameEncoding, Vec<u8>)>,
    ) -> MessageId {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut message = Message::new(id, session_id, kind, recording_id, audio_frame_no);
        if let Some((encoding, bytes)) = payload {
            message = message.with_payload(encoding, bytes);
        }
        self.messages.write().await.insert(id, message);
        id
    }

    /// Snapshot of messages of `kind` that scanners have not yet queued.
    pub async fn unqueued_messages(&self, kind: MessageKind) -> Vec<Message> {
        self.messages
            .read()
            .await
            .values()
            .filter(|m| m.kind == kind && m.queued_at.is_none())
            .cloned()
            .collect()
    }

    pub async fn mark_message_queued(&self, id: MessageId) {
        if let Some(m) = self.messages.write().await.get_mut(&id) {
            m.queued_at = Some(Utc::now());
        }
    }

    pub async fn mark_message_started(&self, id: MessageId) {
        if let Some(m) = self.messages.write().await.get_mut(&id) {
            m.process_started_at = Some(Utc::now());
        }
    }

    pub async fn remove_message(&self, id: MessageId) -> Option<Message> {
        self.messages.write().await.remove(&id)
    }

    // ---- Recordings -----------------------------------------------------

    pub async fn seed_recording(&self, config: RecordingConfig) {
        let id = config.id;
        self.recordings.write().await.insert(id, RecordingEntry::new(config));
    }

    pub async fn has_recording(&self, id: RecordingId) -> bool {
        self.recordings.read().await.contains_key(&id)
    }

    pub async fn recording_config(&self, id: RecordingId) -> Option<RecordingConfig> {
        self.recordings.read().await.get(&id).map(|e| e.config.clone())
    }

    /// Records a client-supplied FRAME sequence number against a
    /// recording's running total, tracking any gaps. Non-positive frame
    /// numbers are always rejected and never shift `next_expected_frame_no`.
    pub async fn record_client_frame_no(&self, id: RecordingId, client_frame_no: i64) -> Option<ClientFrameAck> {
        let mut recordings = self.recordings.write().await;
        let entry = recordings.get_mut(&id)?;
        let next_expected = entry.aligner.status().next_frame_no.max(1);

        if client_frame_no <= 0 {
            return Some(ClientFrameAck {
                accepted: false,
                next_expected_frame_no: next_expected,
                missing_frames: entry.missing_client_frame_nos.clone(),
            });
        }

        if client_frame_no > entry.last_client_frame_no + 1 {
            for missing in (entry.last_client_frame_no + 1)..client_frame_no {
                entry.missing_client_frame_nos.push(missing);
            }
            if entry.missing_client_frame_nos.len() > MAX_TRACKED_GAPS {
                let overflow = entry.missing_client_frame_nos.len() - MAX_TRACKED_GAPS;
                entry.missing_client_frame_nos.drain(0..overflow);
            }
        } else {
            entry.missing_client_frame_nos.retain(|&m| m != client_frame_no);
        }
        entry.last_client_frame_no = entry.last_client_frame_no.max(client_frame_no);

        Some(ClientFrameAck {
            accepted: true,
            next_expected_frame_no: next_expected,
            missing_frames: entry.missing_client_frame_nos.clone(),
        })
    }

    pub async fn insert_pre_split_frame(&self, frame: PreSplitFrame) {
        if let Some(entry) = self.recordings.write().await.get_mut(&frame.recording_id) {
            entry.pre_split.insert(frame.client_frame_no, frame);
        }
    }

    pub async fn mark_pre_split_split(&self, recording_id: RecordingId, client_frame_no: i64) {
        if let Some(entry) = self.recordings.write().await.get_mut(&recording_id) {
            if let Some(f) = entry.pre_split.get_mut(&client_frame_no) {
                f.split_at = Some(Utc::now());
            }
        }
    }

    /// Feeds `bytes` through the recording's aligner and bumps the
    /// recording's running totals. Returns every full frame the aligner
    /// produced as a side effect.
    pub async fn split_via_aligner(&self, id: RecordingId, bytes: &[u8]) -> Vec<(i64, Vec<u8>)> {
        let mut recordings = self.recordings.write().await;
        let Some(entry) = recordings.get_mut(&id) else { return Vec::new() };
        let produced = entry.aligner.split(bytes);
        entry.config.total_bytes_received += bytes.len() as u64;
        entry.config.total_split_frames_produced += produced.len() as u64;
        produced
    }

    /// Called once at finalize: drains any partial trailing frame.
    pub async fn flush_aligner(&self, id: RecordingId) -> Option<(i64, Vec<u8>, bool)> {
        let mut recordings = self.recordings.write().await;
        let entry = recordings.get_mut(&id)?;
        let flushed = entry.aligner.flush();
        if flushed.is_some() {
            entry.config.total_split_frames_produced += 1;
        }
        flushed
    }

    pub async fn insert_split_frame(&self, meta: SplitFrameMeta, payload: SplitFramePayload) {
        let frame_no = meta.frame_no;
        if let Some(entry) = self.recordings.write().await.get_mut(&meta.recording_id) {
            entry.split_meta.insert(frame_no, meta);
            entry.split_payload.insert(frame_no, payload);
        }
    }

    /// Snapshot of `(recording_id, frame_no)` for split frames scanner 6
    /// hasn't yet dispatched for processing.
    pub async fn unqueued_split_frames(&self) -> Vec<(RecordingId, i64)> {
        self.recordings
            .read()
            .await
            .iter()
            .flat_map(|(rid, entry)| {
                entry
                    .split_meta
                    .values()
                    .filter(|m| m.dt_processing_queued_to_start.is_none())
                    .map(move |m| (*rid, m.frame_no))
            })
            .collect()
    }

    pub async fn mark_split_frame_queued(&self, id: RecordingId, frame_no: i64) {
        self.update_split_frame_meta(id, frame_no, |m| {
            m.dt_processing_queued_to_start = Some(Utc::now());
        })
        .await;
    }

    pub async fn update_split_frame_meta(
        &self,
        id: RecordingId,
        frame_no: i64,
        f: impl FnOnce(&mut SplitFrameMeta),
    ) {
        if let Some(entry) = self.recordings.write().await.get_mut(&id) {
            if let Some(meta) = entry.split_meta.get_mut(&frame_no) {
                f(meta);
            }
        }
    }

    pub async fn split_frame_meta(&self, id: RecordingId, frame_no: i64) -> Option<SplitFrameMeta> {
        self.recordings.read().await.get(&id)?.split_meta.get(&frame_no).cloned()
    }

    pub async fn split_frame_payload(&self, id: RecordingId, frame_no: i64) -> Option<SplitFramePayload> {
        self.recordings.read().await.get(&id)?.split_payload.get(&frame_no).cloned()
    }

    pub async fn set_split_frame_resampled(
        &self,
        id: RecordingId,
        frame_no: i64,
        audio_22050: Vec<f32>,
        audio_16000: Vec<f32>,
    ) {
        if let Some(entry) = self.recordings.write().await.get_mut(&id) {
            if let Some(p) = entry.split_payload.get_mut(&frame_no) {
                p.audio_22050 = audio_22050;
                p.audio_16000 = audio_16000;
            }
        }
    }

    /// Drops the volatile byte/float arrays once every enabled analyzer has
    /// stamped an end time. The metadata row is untouched.
    pub async fn release_split_frame_payload(&self, id: RecordingId, frame_no: i64) {
        if let Some(entry) = self.recordings.write().await.get_mut(&id) {
            entry.split_payload.remove(&frame_no);
        }
    }

    pub async fn mark_recording_stopped(&self, id: RecordingId) -> bool {
        let mut recordings = self.recordings.write().await;
        if let Some(entry) = recordings.get_mut(&id) {
            let was_open = entry.config.stopped_at.is_none();
            entry.config.mark_stopped();
            was_open
        } else {
            false
        }
    }

    /// Recordings stopped longer than `grace` ago with every split frame
    /// fully analyzed and no outstanding messages referencing them.
    pub async fn recordings_ready_to_finalize(&self, grace: chrono::Duration) -> Vec<RecordingId> {
        let now = Utc::now();
        let pending_recordings: std::collections::HashSet<RecordingId> = self
            .messages
            .read()
            .await
            .values()
            .filter_map(|m| m.recording_id)
            .collect();

        self.recordings
            .read()
            .await
            .iter()
            .filter_map(|(id, entry)| {
                let stopped_at = entry.config.stopped_at?;
                let past_grace = now.signed_duration_since(stopped_at) >= grace;
                let all_analyzed = entry.split_meta.values().all(|m| m.is_fully_analyzed());
                let not_pending = !pending_recordings.contains(id);
                (past_grace && all_analyzed && not_pending).then_some(*id)
            })
            .collect()
    }

    /// Removes every in-memory trace of `id`. Called once, by the
    /// finalizer, after its stored-procedure call has returned.
    pub async fn remove_recording(&self, id: RecordingId) {
        self.recordings.write().await.remove(&id);
    }

    pub async fn split_frame_numbers(&self, id: RecordingId) -> Vec<i64> {
        let recordings = self.recordings.read().await;
        let Some(entry) = recordings.get(&id) else { return Vec::new() };
        let mut nos: Vec<i64> = entry.split_meta.keys().copied().collect();
        nos.sort_unstable();
        nos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::recording::{AnalyzerFlags, RecordingMode};

    fn flags() -> AnalyzerFlags {
        AnalyzerFlags::default()
    }

    #[tokio::test]
    async fn seeding_and_removing_a_recording_round_trips() {
        let store = RecordingStateStore::new();
        let config = RecordingConfig::new(1, RecordingMode::Compose, 1, "out.wav".into(), flags());
        store.seed_recording(config).await;
        assert!(store.has_recording(1).await);
        store.remove_recording(1).await;
        assert!(!store.has_recording(1).await);
    }

    #[tokio::test]
    async fn non_positive_client_frame_no_is_rejected_without_shifting_next_expected() {
        let store = RecordingStateStore::new();
        let config = RecordingConfig::new(1, RecordingMode::Practice, 1, "out.wav".into(), flags());
        store.seed_recording(config).await;

        let ack = store.record_client_frame_no(1, 0).await.unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.next_expected_frame_no, 1);
    }

    #[tokio::test]
    async fn out_of_order_frames_are_tracked_as_missing() {
        let store = RecordingStateStore::new();
        let config = RecordingConfig::new(1, RecordingMode::Practice, 1, "out.wav".into(), flags());
        store.seed_recording(config).await;

        store.record_client_frame_no(1, 1).await.unwrap();
        let ack = store.record_client_frame_no(1, 4).await.unwrap();
        assert_eq!(ack.missing_frames, vec![2, 3]);
    }

    #[tokio::test]
    async fn split_via_aligner_bumps_recording_totals() {
        let store = RecordingStateStore::new();
        let config = RecordingConfig::new(1, RecordingMode::Compose, 1, "out.wav".into(), flags());
        store.seed_recording(config).await;

        let bytes = vec![0u8; crate::services::frame_aligner::AUDIO_BYTES_PER_FRAME];
        let produced = store.split_via_aligner(1, &bytes).await;
        assert_eq!(produced.len(), 1);

        let updated = store.recording_config(1).await.unwrap();
        assert_eq!(updated.total_bytes_received, bytes.len() as u64);
        assert_eq!(updated.total_split_frames_produced, 1);
    }
}
