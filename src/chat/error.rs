//! Error taxonomy for the messaging core
//!
//! Business-rule rejections (timeout, moderation, permission, rate limit) are
//! expected outcomes and are reported to the client as-is. Infrastructure
//! failures carry the underlying `anyhow` chain.

use chrono::{DateTime, Utc};

pub type ChatResult<T> = std::result::Result<T, ChatError>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: max {limit} events per {window_secs}s")]
    RateLimitExceeded { limit: u32, window_secs: u64 },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("User is timed out until {until}")]
    TimedOutUser { until: DateTime<Utc> },

    #[error("Message blocked by moderation ({})", .categories.join(", "))]
    ModerationBlocked { categories: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("Summarization failed: {0:#}")]
    Summarization(#[source] anyhow::Error),
}

impl ChatError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Authentication(_) => "authentication_error",
            ChatError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ChatError::Validation(_) => "validation_error",
            ChatError::PermissionDenied(_) => "permission_denied",
            ChatError::TimedOutUser { .. } => "timed_out_user",
            ChatError::ModerationBlocked { .. } => "moderation_blocked",
            ChatError::NotFound(_) => "not_found",
            ChatError::Persistence(_) => "persistence_failure",
            ChatError::Summarization(_) => "summarization_failure",
        }
    }

    /// True for rejections caused by the caller rather than by the server
    pub fn is_business_rejection(&self) -> bool {
        !matches!(
            self,
            ChatError::Persistence(_) | ChatError::Summarization(_)
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }
}

/// Parse a UUID-shaped identifier, reporting which field was malformed
pub fn parse_id(raw: &str, field: &str) -> ChatResult<uuid::Uuid> {
    uuid::Uuid::parse_str(raw.trim())
        .map_err(|_| ChatError::Validation(format!("Invalid {}: {}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            ChatError::Authentication("x".into()).code(),
            "authentication_error"
        );
        assert_eq!(
            ChatError::RateLimitExceeded {
                limit: 100,
                window_secs: 60
            }
            .code(),
            "rate_limit_exceeded"
        );
        assert_eq!(
            ChatError::ModerationBlocked { categories: vec![] }.code(),
            "moderation_blocked"
        );
        assert_eq!(
            ChatError::Persistence(anyhow::anyhow!("down")).code(),
            "persistence_failure"
        );
    }

    #[test]
    fn test_business_vs_infrastructure() {
        assert!(ChatError::PermissionDenied("no".into()).is_business_rejection());
        assert!(ChatError::TimedOutUser { until: Utc::now() }.is_business_rejection());
        assert!(!ChatError::Persistence(anyhow::anyhow!("down")).is_business_rejection());
    }

    #[test]
    fn test_moderation_message_lists_categories() {
        let err = ChatError::ModerationBlocked {
            categories: vec!["harassment".into(), "spam".into()],
        };
        assert_eq!(
            err.to_string(),
            "Message blocked by moderation (harassment, spam)"
        );
    }

    #[test]
    fn test_parse_id() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "projectId").unwrap(), id);
        let err = parse_id("not-a-uuid", "projectId").unwrap_err();
        assert!(matches!(err, ChatError::Validation(ref m) if m.contains("projectId")));
    }
}
