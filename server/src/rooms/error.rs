//! Room Errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors surfaced by the room HTTP handlers.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Room descriptor not found (or the store is unreachable).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Uploaded file exceeds the configured cap.
    #[error("File too large (max: {max_bytes} bytes)")]
    FileTooLarge {
        /// Maximum accepted size in bytes.
        max_bytes: usize,
    },

    /// Malformed upload request.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Filesystem error while storing an upload.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::RoomNotFound(_) => (StatusCode::NOT_FOUND, "ROOM_NOT_FOUND", self.to_string()),
            Self::FileTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "FILE_TOO_LARGE",
                self.to_string(),
            ),
            Self::InvalidUpload(_) => (StatusCode::BAD_REQUEST, "INVALID_UPLOAD", self.to_string()),
            Self::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                "Failed to store file".to_string(),
            ),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Result type for room operations.
pub type RoomResult<T> = Result<T, RoomError>;
