// src/api/error.rs
// Closed error taxonomy for the chat surface. Every externally visible
// failure carries a stable machine-readable code plus a human message; no
// internal detail crosses the boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// No resolvable identity; surfaced before any generation is attempted.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed turn (e.g. no user message in the request).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The conversation belongs to a different user.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote tool catalog endpoint is unreachable. Recovered locally in
    /// the session manager; only surfaces when nothing else is possible.
    #[error("tool provider unavailable: {0}")]
    ToolProviderUnavailable(String),

    /// Model invocation transport failure - fatal to the current turn.
    /// Reaches clients as the terminal stream error frame, not as an HTTP
    /// status.
    #[error("model transport failure: {0}")]
    ModelTransport(String),

    /// Durable store failure. Fatal for the pre-generation save, swallowed
    /// (with a log line) for the post-generation save.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Unauthorized(_) => "UNAUTHORIZED",
            ChatError::BadRequest(_) => "BAD_REQUEST",
            ChatError::Forbidden(_) => "FORBIDDEN",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::ToolProviderUnavailable(_) => "TOOL_PROVIDER_UNAVAILABLE",
            ChatError::ModelTransport(_) => "MODEL_TRANSPORT",
            ChatError::Persistence(_) => "PERSISTENCE",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::ToolProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            ChatError::ModelTransport(_) => StatusCode::BAD_GATEWAY,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
        }
        let body = json!({
            "error": true,
            "error_code": self.code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Persistence(e.to_string())
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        ChatError::Internal(e.to_string())
    }
}

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
