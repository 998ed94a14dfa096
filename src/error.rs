use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("note-detection service error: {0}")]
    NoteService(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame integrity error: {0}")]
    Integrity(String),

    #[error("analyzer '{analyzer}' failed: {message}")]
    Analyzer { analyzer: &'static str, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("recording {0} not found")]
    RecordingNotFound(i64),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
            }
            AppError::Io(ref e) => {
                tracing::error!(error = %e, "io error");
                (StatusCode::INTERNAL_SERVER_ERROR, "io error".to_string())
            }
            AppError::NoteService(ref e) => {
                tracing::error!(error = %e, "note-detection service error");
                (StatusCode::BAD_GATEWAY, "note-detection service unavailable".to_string())
            }
            AppError::Protocol(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Integrity(ref msg) => {
                tracing::error!(reason = %msg, "frame integrity error");
                (StatusCode::INTERNAL_SERVER_ERROR, "frame integrity error".to_string())
            }
            AppError::Analyzer { analyzer, ref message } => {
                tracing::warn!(analyzer, error = %message, "analyzer error");
                (StatusCode::OK, format!("{analyzer}: {message}"))
            }
            AppError::Config(ref msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::RecordingNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("recording {id} not found"))
            }
            AppError::Internal(ref e) => {
                tracing::error!(error = ?e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
