//! WebSocket intake (C10): the client-facing edge of the pipeline. START and
//! STOP are handled inline (an O(1) state-store write plus an immediate
//! reply); FRAME payloads are deposited into the Recording State Store for
//! the orchestrator's scanners to split and analyze off the hot path.

use std::collections::VecDeque;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::AppState;
use crate::models::frame::FrameEncoding;
use crate::models::message::MessageKind;
use crate::models::RecordingId;

pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/ws/stream", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "MESSAGE_TYPE", rename_all = "SCREAMING_SNAKE_CASE")]
enum ClientMessage {
    Start {
        recording_id: RecordingId,
    },
    Frame {
        recording_id: RecordingId,
        audio_frame_no: i64,
        #[serde(default)]
        audio_frame_base64: Option<String>,
        #[serde(default)]
        audio_frame_hex: Option<String>,
    },
    Stop {
        recording_id: RecordingId,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "MESSAGE_TYPE", rename_all = "SCREAMING_SNAKE_CASE")]
enum ServerMessage {
    StartAck {
        recording_id: RecordingId,
    },
    Ack {
        recording_id: RecordingId,
        audio_frame_no: i64,
        next_expected_frame_no: i64,
        missing_frames: Vec<i64>,
    },
    StopAck {
        recording_id: RecordingId,
    },
    Error {
        message: String,
    },
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let peer_addr = None;
    let session_id = state.store.accept_session(peer_addr, Vec::new()).await;
    info!(session_id, "websocket session accepted");

    // Raw-encoded FRAME announcements arrive as a text message followed by a
    // binary message carrying the bytes; this queue pairs them FIFO within
    // this session's own sequential read loop.
    let mut pending_raw: VecDeque<(RecordingId, i64)> = VecDeque::new();
    let mut last_recording_id: Option<RecordingId> = None;

    loop {
        tokio::select! {
            _ = state.cancellation.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        if !handle_text(&mut socket, &state, session_id, &text, &mut pending_raw, &mut last_recording_id).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        let Some((recording_id, audio_frame_no)) = pending_raw.pop_front() else {
                            warn!(session_id, "binary frame with no pending raw announcement, dropping");
                            continue;
                        };
                        let ack = state
                            .store
                            .enqueue_message(
                                session_id,
                                MessageKind::Frame,
                                Some(recording_id),
                                Some(audio_frame_no),
                                Some((FrameEncoding::Raw, bytes.to_vec())),
                            )
                            .await;
                        let _ = ack;
                        send_frame_ack(&mut socket, &state, recording_id, audio_frame_no).await;
                    }
                    Ok(Message::Close(_)) => {
                        info!(session_id, "websocket closed by client");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(session_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    // Infer STOP on disconnect if the client never sent one explicitly.
    if let Some(recording_id) = last_recording_id {
        if state.store.has_recording(recording_id).await {
            state.store.mark_recording_stopped(recording_id).await;
            info!(session_id, recording_id, "inferred stop on disconnect");
        }
    }

    state.store.close_session(session_id).await;
    state.store.remove_session(session_id).await;
    info!(session_id, "websocket session closed");
}

async fn handle_text(
    socket: &mut WebSocket,
    state: &AppState,
    session_id: crate::models::SessionId,
    text: &str,
    pending_raw: &mut VecDeque<(RecordingId, i64)>,
    last_recording_id: &mut Option<RecordingId>,
) -> bool {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(session_id, error = %e, "invalid client message");
            send(socket, &ServerMessage::Error { message: format!("invalid message: {e}") }).await;
            return true;
        }
    };

    match parsed {
        ClientMessage::Start { recording_id } => {
            // Config itself is loaded by Scanner 3A via stored procedures
            // once this message is dequeued; the intake layer only records
            // that a START was requested.
            state
                .store
                .enqueue_message(session_id, MessageKind::Start, Some(recording_id), None, None)
                .await;
            *last_recording_id = Some(recording_id);
            send(socket, &ServerMessage::StartAck { recording_id }).await;
        }
        ClientMessage::Frame { recording_id, audio_frame_no, audio_frame_base64, audio_frame_hex } => {
            *last_recording_id = Some(recording_id);

            if !state.store.has_recording(recording_id).await {
                send(socket, &ServerMessage::Error { message: format!("unknown recording {recording_id}") }).await;
                return true;
            }

            if audio_frame_no <= 0 {
                // Acked but never stored: non-positive frame numbers never
                // shift the recording's expected-frame tracking.
                send_frame_ack(socket, state, recording_id, audio_frame_no).await;
                return true;
            }

            if let Some(b64) = audio_frame_base64 {
                state
                    .store
                    .enqueue_message(
                        session_id,
                        MessageKind::Frame,
                        Some(recording_id),
                        Some(audio_frame_no),
                        Some((FrameEncoding::Base64, b64.into_bytes())),
                    )
                    .await;
                send_frame_ack(socket, state, recording_id, audio_frame_no).await;
            } else if let Some(hex) = audio_frame_hex {
                state
                    .store
                    .enqueue_message(
                        session_id,
                        MessageKind::Frame,
                        Some(recording_id),
                        Some(audio_frame_no),
                        Some((FrameEncoding::Hex, hex.into_bytes())),
                    )
                    .await;
                send_frame_ack(socket, state, recording_id, audio_frame_no).await;
            } else {
                // Raw bytes follow as the next binary message.
                pending_raw.push_back((recording_id, audio_frame_no));
            }
        }
        ClientMessage::Stop { recording_id } => {
            state
                .store
                .enqueue_message(session_id, MessageKind::Stop, Some(recording_id), None, None)
                .await;
            *last_recording_id = None;
            send(socket, &ServerMessage::StopAck { recording_id }).await;
        }
    }

    true
}

async fn send_frame_ack(socket: &mut WebSocket, state: &AppState, recording_id: RecordingId, audio_frame_no: i64) {
    let ack = state.store.record_client_frame_no(recording_id, audio_frame_no).await;
    let (next_expected_frame_no, missing_frames) = match ack {
        Some(ack) => (ack.next_expected_frame_no, ack.missing_frames),
        None => (0, Vec::new()),
    };
    send(
        socket,
        &ServerMessage::Ack { recording_id, audio_frame_no, next_expected_frame_no, missing_frames },
    )
    .await;
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            if let Err(e) = socket.send(Message::Text(json.into())).await {
                warn!(error = %e, "failed to send websocket reply");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize websocket reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_message_parses_with_defaults() {
        let json = r#"{"MESSAGE_TYPE":"START","recording_id":1}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, ClientMessage::Start { recording_id: 1 }));
    }

    #[test]
    fn frame_message_with_base64_payload_parses() {
        let json = r#"{"MESSAGE_TYPE":"FRAME","recording_id":1,"audio_frame_no":3,"audio_frame_base64":"AAA="}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed {
            ClientMessage::Frame { audio_frame_no, audio_frame_base64, .. } => {
                assert_eq!(audio_frame_no, 3);
                assert_eq!(audio_frame_base64.as_deref(), Some("AAA="));
            }
            _ => panic!("expected Frame"),
        }
    }

    #[test]
    fn stop_message_parses() {
        let json = r#"{"MESSAGE_TYPE":"STOP","recording_id":9}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, ClientMessage::Stop { recording_id: 9 }));
    }

    #[test]
    fn server_ack_serializes_with_screaming_snake_tag() {
        let msg = ServerMessage::Ack {
            recording_id: 1,
            audio_frame_no: 2,
            next_expected_frame_no: 3,
            missing_frames: vec![],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"MESSAGE_TYPE\":\"ACK\""));
    }
}
