use crate::services::relay_service::RelayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Map relay errors onto HTTP answers. Missing, expired, and exhausted
/// handles all produce the same 404 body: a client cannot tell whether an id
/// never existed or stopped existing.
impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(_) | RelayError::Expired(_) | RelayError::QuotaExhausted(_) => {
                AppError::not_found("file not found or expired")
            }
            RelayError::TooLarge { limit } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file too large (max {} bytes)", limit),
            ),
            RelayError::Conflict(_) => AppError::internal("internal error"),
            RelayError::Io(err) => AppError::internal(format!("storage error: {}", err)),
        }
    }
}
