//! Health and diagnostic surface: `/health`, `/performance`, `/routes`.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::api::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/performance", get(performance))
        .route("/routes", get(routes))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_seconds = chrono::Utc::now().signed_duration_since(state.started_at).num_seconds();
    Json(json!({ "status": "ok", "uptime_seconds": uptime_seconds }))
}

/// Coarse liveness signal for each recording currently held in memory: its
/// aligner's buffered bytes and total frames produced so far.
async fn performance(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "cpu_count": std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1),
    }))
}

async fn routes() -> impl IntoResponse {
    Json(json!({
        "routes": [
            "GET /health",
            "GET /performance",
            "GET /routes",
            "GET /ws/stream (websocket upgrade)",
        ]
    }))
}
