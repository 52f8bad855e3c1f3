//! AuthUser extractor for Axum handlers.
//!
//! Extracts the authenticated identity from request extensions
//! (populated by the `require_auth` middleware).

use crate::api::handlers::{ApiState, AppError};
use crate::auth::{Identity, Role};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Authenticated user, usable as a handler parameter:
///
/// ```rust,ignore
/// async fn my_handler(user: AuthUser) -> impl IntoResponse {
///     format!("Hello, {}!", user.name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    identity: Identity,
}

impl AuthUser {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl From<Identity> for AuthUser {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            role: identity.role,
            identity,
        }
    }
}

impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &ApiState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async {
            parts
                .extensions
                .get::<Identity>()
                .cloned()
                .map(AuthUser::from)
                .ok_or_else(|| {
                    AppError::Unauthorized(
                        "Authentication required: no identity in request".to_string(),
                    )
                })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{instructor_identity, test_config};
    use crate::AppState;
    use std::sync::Arc;

    fn state() -> ApiState {
        Arc::new(AppState::new(test_config()).unwrap())
    }

    #[tokio::test]
    async fn test_extracts_identity_from_extensions() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        parts.extensions.insert(instructor_identity());

        let user = AuthUser::from_request_parts(&mut parts, &state())
            .await
            .unwrap();
        assert_eq!(user.user_id, "instr-1");
        assert_eq!(user.role, Role::Instructor);
        assert_eq!(user.identity(), &instructor_identity());
    }

    #[tokio::test]
    async fn test_missing_identity_rejected() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let err = AuthUser::from_request_parts(&mut parts, &state())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
