use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;

/// One accepted client channel on `/ws/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub peer_addr: Option<String>,
    pub subprotocol_headers: Vec<(String, String)>,
    pub accepted_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, peer_addr: Option<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            id,
            peer_addr,
            subprotocol_headers: headers,
            accepted_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn close(&mut self) {
        if self.closed_at.is_none() {
            self.closed_at = Some(Utc::now());
        }
    }
}
