//! Conversation and message data contracts
//!
//! Shapes shared by the message service, the context assembler and the
//! persistence layer. Threading fields follow these rules:
//! - `thread_depth(child) == thread_depth(parent) + 1` for every reply
//! - exactly one message per `thread_id` has `is_thread_root = true`
//! - the root's `thread_message_count` equals the number of replies sharing its `thread_id`

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Sender
// ============================================================================

/// Author of a message.
///
/// Serialized as `{"type": "student", "id": "...", "name": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sender {
    Student { id: String, name: String },
    Instructor { id: String, name: String },
    Persona { id: String, name: String },
    System { id: String, name: String },
}

impl Sender {
    pub fn id(&self) -> &str {
        match self {
            Sender::Student { id, .. }
            | Sender::Instructor { id, .. }
            | Sender::Persona { id, .. }
            | Sender::System { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Sender::Student { name, .. }
            | Sender::Instructor { name, .. }
            | Sender::Persona { name, .. }
            | Sender::System { name, .. } => name,
        }
    }

    /// Whether this sender is a human participant of the conversation
    /// (counted in participants and unread counters).
    pub fn is_human(&self) -> bool {
        match self {
            Sender::Student { .. } | Sender::Instructor { .. } => true,
            Sender::Persona { .. } | Sender::System { .. } => false,
        }
    }
}

// ============================================================================
// Message content
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    File,
    Link,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
            MessageType::Link => "link",
            MessageType::System => "system",
        }
    }
}

/// File, link or milestone details attached to a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Approved,
    /// Persisted, but a medium-severity flag was raised for review
    Flagged,
}

// ============================================================================
// Message
// ============================================================================

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub project_id: Uuid,
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub moderation_status: ModerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_title: Option<String>,
    pub thread_depth: u32,
    pub thread_position: u32,
    pub is_thread_root: bool,
    pub thread_message_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a non-threaded message from a draft
    pub fn from_draft(
        conversation_id: Uuid,
        draft: MessageDraft,
        moderation_status: ModerationStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            project_id: draft.project_id,
            sender: draft.sender,
            content: draft.content,
            message_type: draft.message_type,
            metadata: draft.metadata,
            moderation_status,
            parent_message_id: None,
            thread_id: None,
            thread_title: None,
            thread_depth: 0,
            thread_position: 0,
            is_thread_root: false,
            thread_message_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A message as submitted, before moderation and persistence.
///
/// The sender is always attached server-side from the authenticated identity.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub project_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<MessageMetadata>,
}

impl MessageDraft {
    pub fn text(project_id: Uuid, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            project_id,
            sender,
            content: content.into(),
            message_type: MessageType::Text,
            metadata: None,
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Denormalized preview of the newest message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: Uuid,
    pub content: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

/// Maximum length of the `last_message` preview content
pub const LAST_MESSAGE_PREVIEW_CHARS: usize = 100;

impl LastMessage {
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            message_id: message.id,
            content: message
                .content
                .chars()
                .take(LAST_MESSAGE_PREVIEW_CHARS)
                .collect(),
            sender_name: message.sender.name().to_string(),
            created_at: message.created_at,
        }
    }
}

/// One conversation per project, created lazily on the first message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub message_count: u64,
    pub unread_counts: HashMap<String, u64>,
    pub created_at: DateTime<Utc>,
    /// Revision marker, strictly increasing on every mutation
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(project_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            participants: Vec::new(),
            last_message: None,
            message_count: 0,
            unread_counts: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the revision. Wall-clock time is used unless it would not
    /// move forward (clock skew or two mutations within one tick).
    pub fn bump_revision(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    /// Record a newly persisted message: preview, count, participants, unread counters
    pub fn record_message(&mut self, message: &ChatMessage) {
        self.message_count += 1;
        self.last_message = Some(LastMessage::from_message(message));

        let sender_id = message.sender.id();
        if message.sender.is_human() && !self.participants.iter().any(|p| p == sender_id) {
            self.participants.push(sender_id.to_string());
        }
        for participant in &self.participants {
            if participant != sender_id {
                *self.unread_counts.entry(participant.clone()).or_insert(0) += 1;
            }
        }
        self.bump_revision();
    }

    /// Record the removal of `removed` messages
    pub fn record_removal(&mut self, removed: u64) {
        self.message_count = self.message_count.saturating_sub(removed);
        self.bump_revision();
    }

    /// Reset a participant's unread counter
    pub fn mark_read(&mut self, user_id: &str) {
        self.unread_counts.insert(user_id.to_string(), 0);
        self.bump_revision();
    }
}

// ============================================================================
// Persona
// ============================================================================

/// AI persona configuration consulted by the context assembler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    /// Number of recent messages passed verbatim (falls back to the configured default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderActivity {
    pub sender_id: String,
    pub sender_name: String,
    pub message_count: u64,
}

/// Aggregate chat activity for a project over an optional date range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatistics {
    pub total_messages: u64,
    pub unique_senders: u64,
    pub message_types: HashMap<String, u64>,
    pub top_senders: Vec<SenderActivity>,
}
