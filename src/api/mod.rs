pub mod health;
pub mod stream;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::services::state_store::RecordingStateStore;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordingStateStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub cancellation: CancellationToken,
}

pub use health::health_routes;
pub use stream::stream_routes;
