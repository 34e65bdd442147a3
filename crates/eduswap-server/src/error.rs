use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use eduswap_shared::SwapStatus;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A swap state machine precondition was violated.
    #[error("Cannot {action} a swap in status {status}")]
    InvalidTransition {
        status: SwapStatus,
        action: &'static str,
    },

    /// The acting student is not a participant of the target swap/chat.
    #[error("Forbidden: {0}")]
    Unauthorized(String),

    /// The referenced record does not exist.  Reported distinctly from
    /// [`ServerError::Unauthorized`] so clients can tell "doesn't exist"
    /// from "not yours".
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The durable layer is unreachable or a query failed.  In-memory caches
    /// are left untouched when this is returned; the caller may retry.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("File storage error: {0}")]
    FileStorage(String),

    #[error("AI provider error: {0}")]
    AiProvider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::FileStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "File storage error".to_string())
            }
            ServerError::AiProvider(_) => {
                (StatusCode::BAD_GATEWAY, "AI provider error".to_string())
            }
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
