use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to open {locator}: {reason}")]
    DeviceOpen { locator: String, reason: String },

    #[error("Frame read failed: {0}")]
    TransientRead(String),

    #[error("Producer already connected")]
    ProducerConflict,

    #[error("Timed out waiting for role registration")]
    RoleTimeout,

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ProducerConflict => StatusCode::CONFLICT,
            AppError::RoleTimeout => StatusCode::REQUEST_TIMEOUT,
            AppError::DeviceOpen { .. } | AppError::TransientRead(_) | AppError::VideoError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error_message = %body.message, "Request failed");
        } else {
            tracing::debug!(error_message = %body.message, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
