//! Shared API state, error type and health endpoint

use crate::chat::ChatError;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

/// Shared server state
pub type ApiState = Arc<AppState>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub auth: bool,
    pub sessions: usize,
}

/// Liveness plus a count of connected gateway sessions
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth: state.config.auth_config.is_some(),
            sessions: state.bus.subscriber_count(),
        }),
    )
}

// ============================================================================
// Error handling
// ============================================================================

/// API error type
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    /// Chat store failure
    Persistence(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    /// Business rejection of an otherwise valid request
    Rejected { code: &'static str, message: String },
    TooManyRequests(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::Persistence(_) => "persistence_failure",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "validation_error",
            AppError::Unauthorized(_) => "authentication_error",
            AppError::Forbidden(_) => "permission_denied",
            AppError::Rejected { code, .. } => code,
            AppError::TooManyRequests(_) => "rate_limit_exceeded",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let (status, message) = match self {
            AppError::Internal(e) | AppError::Persistence(e) => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Rejected { message, .. } => (StatusCode::UNPROCESSABLE_ENTITY, message),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::Authentication(_) => AppError::Unauthorized(message),
            ChatError::RateLimitExceeded { .. } => AppError::TooManyRequests(message),
            ChatError::Validation(_) => AppError::BadRequest(message),
            ChatError::PermissionDenied(_) => AppError::Forbidden(message),
            ChatError::TimedOutUser { .. } | ChatError::ModerationBlocked { .. } => {
                AppError::Rejected {
                    code: err.code(),
                    message,
                }
            }
            ChatError::NotFound(_) => AppError::NotFound(message),
            ChatError::Persistence(e) => AppError::Persistence(e),
            ChatError::Summarization(e) => AppError::Internal(e),
        }
    }
}
