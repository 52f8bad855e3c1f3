//! Auth middleware for Axum routes.
//!
//! Verifies the Bearer credential through the configured [`TokenVerifier`]
//! and injects the resulting [`Identity`] into request extensions. In
//! anonymous mode every request passes as the anonymous student.
//!
//! [`TokenVerifier`]: crate::auth::TokenVerifier
//! [`Identity`]: crate::auth::Identity

use crate::api::handlers::{ApiState, AppError};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

/// Raw token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that requires a verified identity.
///
/// 401 when the credential is missing, malformed, expired or outside the
/// allowed email domain.
pub async fn require_auth(
    State(state): State<ApiState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = state
        .verifier
        .verify(bearer_token(req.headers()))
        .map_err(|e| AppError::Unauthorized(format!("Invalid credential: {}", e)))?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

// ============================================================================
// Tests
// ============================================================================
