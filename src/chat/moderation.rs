//! Moderation gate contract
//!
//! The content-analysis algorithm lives in an external service; this module
//! only consumes its verdict: `analyze(content) -> {isInappropriate, severity, categories}`.
//!
//! Implementations:
//! - [`HttpModerationGate`]: POSTs `{"content": ...}` to the configured analyze endpoint
//! - [`PermissiveModerationGate`]: approves everything (moderation not configured)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a moderation verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

/// Verdict returned by the content-analysis collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    #[serde(default)]
    pub is_inappropriate: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ModerationVerdict {
    pub fn clean() -> Self {
        Self::default()
    }

    /// Content must be rejected and not persisted
    pub fn blocks(&self) -> bool {
        self.severity == Severity::High
    }

    /// Content is persisted but a flag record is raised
    pub fn flags(&self) -> bool {
        self.severity == Severity::Medium
    }
}

/// Review record raised for medium-severity content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub id: Uuid,
    /// Identifier the flag was raised against. This is a provisional id
    /// generated before persistence, not the stored message's id.
    pub message_id: Uuid,
    pub project_id: Uuid,
    pub user_id: String,
    pub content: String,
    pub severity: Severity,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An active moderation timeout for a user in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTimeout {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: String,
    pub reason: Option<String>,
    pub issued_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserTimeout {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Synchronous verdict on message content
#[async_trait]
pub trait ModerationGate: Send + Sync {
    /// Analyze message content and return a verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator is unreachable or answers with
    /// a malformed verdict.
    async fn analyze(&self, content: &str) -> Result<ModerationVerdict>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    content: &'a str,
}

/// Moderation gate backed by an HTTP content-analysis service
#[derive(Clone)]
pub struct HttpModerationGate {
    client: reqwest::Client,
    url: String,
}

impl HttpModerationGate {
    pub fn new(url: String, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build moderation HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ModerationGate for HttpModerationGate {
    async fn analyze(&self, content: &str) -> Result<ModerationVerdict> {
        let resp = self
            .client
            .post(&self.url)
            .json(&AnalyzeRequest { content })
            .send()
            .await
            .context("Moderation request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Moderation service returned {}: {}", status, body);
        }

        resp.json::<ModerationVerdict>()
            .await
            .context("Failed to parse moderation verdict")
    }
}

/// Gate used when no moderation service is configured
#[derive(Debug, Clone, Default)]
pub struct PermissiveModerationGate;

#[async_trait]
impl ModerationGate for PermissiveModerationGate {
    async fn analyze(&self, _content: &str) -> Result<ModerationVerdict> {
        Ok(ModerationVerdict::clean())
    }
}
