use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to the caller of a generation request.
///
/// Per-scenario provider and storage failures never show up here directly: they are
/// recorded in the outcome, and only turn into [`GenerationError::AggregateFailure`]
/// when every scenario failed.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("failed to fetch {role} {url}: {reason}")]
    Fetch { role: String, url: String, reason: String },
    #[error("generation deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),
    #[error("all {} generation attempts failed: {}", .errors.len(), .errors.join("; "))]
    AggregateFailure { errors: Vec<String> },
}

impl GenerationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            GenerationError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::AggregateFailure { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("❌ Generation failed: {}", self);
        } else {
            tracing::info!("Rejected generation request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
