pub mod hooks;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::metrics::SinkError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    /// The output file is gone; the run is over.
    #[error("sink unavailable: {0}")]
    SinkUnavailable(#[from] SinkError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SinkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error":  self.to_string(),
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
