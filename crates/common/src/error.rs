use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Distinguished cache-miss outcome. Never surfaced to HTTP callers;
    /// the dispatch service falls back to the store on it.
    #[error("Cache miss")]
    CacheMiss,

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the failed operation can ever succeed.
    ///
    /// Unknown channels and cancellations are permanent; everything else is
    /// treated as transient by the bounded-retry paths.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AppError::UnknownChannel(_) | AppError::Cancelled)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Redis(_) | AppError::CacheMiss => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Broker(_) | AppError::Publish(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Decode(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnknownChannel(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Send(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
