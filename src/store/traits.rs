//! ChatStore trait definition
//!
//! Abstract interface over the document store holding conversations,
//! messages, moderation records and persona settings. Mirrors the shape of
//! a collection-per-entity store so a database-backed implementation can
//! be swapped in without touching the services.

use crate::chat::models::{ChatMessage, Conversation, PersonaProfile};
use crate::chat::moderation::{FlagRecord, UserTimeout};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

#[async_trait]
pub trait ChatStore: Send + Sync {
    // ========================================================================
    // Conversation operations
    // ========================================================================

    /// Get the conversation of a project
    async fn get_conversation_by_project(&self, project_id: Uuid) -> Result<Option<Conversation>>;

    /// Get a conversation by ID
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Create a conversation (fails if the project already has one)
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Replace a stored conversation
    async fn update_conversation(&self, conversation: &Conversation) -> Result<()>;

    // ========================================================================
    // Message operations
    // ========================================================================

    /// Persist a new message
    async fn insert_message(&self, message: &ChatMessage) -> Result<()>;

    /// Get a message by ID
    async fn get_message(&self, id: Uuid) -> Result<Option<ChatMessage>>;

    /// Replace a stored message
    async fn update_message(&self, message: &ChatMessage) -> Result<()>;

    /// Delete messages, returning how many existed
    async fn delete_messages(&self, ids: &[Uuid]) -> Result<u64>;

    /// All messages of a conversation in insertion order
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>>;

    /// All messages of a thread ordered by `thread_position` ascending
    async fn get_thread_messages(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>>;

    /// Thread roots of a conversation, newest first
    async fn list_thread_roots(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Messages whose content or sender name matches `pattern`, newest first
    async fn search_messages(
        &self,
        conversation_id: Uuid,
        pattern: &Regex,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;

    // ========================================================================
    // Moderation records
    // ========================================================================

    /// Persist a moderation flag
    async fn insert_flag(&self, flag: &FlagRecord) -> Result<()>;

    /// Flags raised in a project, oldest first
    async fn list_flags(&self, project_id: Uuid) -> Result<Vec<FlagRecord>>;

    /// Persist a user timeout
    async fn insert_timeout(&self, timeout: &UserTimeout) -> Result<()>;

    /// The timeout with the latest expiry still active at `now`, if any
    async fn active_timeout(
        &self,
        project_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserTimeout>>;

    // ========================================================================
    // Personas
    // ========================================================================

    /// Get a persona's configuration
    async fn get_persona(&self, persona_id: &str) -> Result<Option<PersonaProfile>>;

    /// Create or replace a persona's configuration
    async fn upsert_persona(&self, persona: &PersonaProfile) -> Result<()>;
}
