//! In-memory implementation of ChatStore.
//!
//! Backs single-process deployments and the test suite. Collections are
//! `tokio::sync::RwLock`-guarded; messages keep insertion order.

use super::traits::ChatStore;
use crate::chat::models::{ChatMessage, Conversation, PersonaProfile};
use crate::chat::moderation::{FlagRecord, UserTimeout};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryChatStore {
    pub conversations: RwLock<HashMap<Uuid, Conversation>>,
    pub messages: RwLock<Vec<ChatMessage>>,
    pub flags: RwLock<Vec<FlagRecord>>,
    pub timeouts: RwLock<Vec<UserTimeout>>,
    pub personas: RwLock<HashMap<String, PersonaProfile>>,
    unavailable: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            flags: RwLock::new(Vec::new()),
            timeouts: RwLock::new(Vec::new()),
            personas: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Store pre-populated with persona profiles, later entries winning on id
    pub fn with_personas(personas: impl IntoIterator<Item = PersonaProfile>) -> Self {
        let personas = personas.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            personas: RwLock::new(personas),
            ..Self::new()
        }
    }

    /// Simulate an outage: every operation fails until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("chat store unavailable");
        }
        Ok(())
    }
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get_conversation_by_project(&self, project_id: Uuid) -> Result<Option<Conversation>> {
        self.check_available()?;
        Ok(self
            .conversations
            .read()
            .await
            .values()
            .find(|c| c.project_id == project_id)
            .cloned())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.check_available()?;
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.check_available()?;
        let mut conversations = self.conversations.write().await;
        if conversations
            .values()
            .any(|c| c.project_id == conversation.project_id)
        {
            bail!(
                "conversation already exists for project {}",
                conversation.project_id
            );
        }
        conversations.insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.check_available()?;
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(&conversation.id) {
            Some(existing) => {
                *existing = conversation.clone();
                Ok(())
            }
            None => bail!("conversation {} not found", conversation.id),
        }
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.check_available()?;
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<ChatMessage>> {
        self.check_available()?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn update_message(&self, message: &ChatMessage) -> Result<()> {
        self.check_available()?;
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message.clone();
                Ok(())
            }
            None => bail!("message {} not found", message.id),
        }
    }

    async fn delete_messages(&self, ids: &[Uuid]) -> Result<u64> {
        self.check_available()?;
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| !ids.contains(&m.id));
        Ok((before - messages.len()) as u64)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.check_available()?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_thread_messages(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.check_available()?;
        let mut thread: Vec<ChatMessage> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.thread_id == Some(thread_id))
            .cloned()
            .collect();
        thread.sort_by_key(|m| m.thread_position);
        Ok(thread)
    }

    async fn list_thread_roots(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.check_available()?;
        let messages = self.messages.read().await;
        // Reverse insertion order first so equal timestamps still list newest first
        let mut roots: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id && m.is_thread_root)
            .cloned()
            .collect();
        roots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(roots.into_iter().skip(offset).take(limit).collect())
    }

    async fn search_messages(
        &self,
        conversation_id: Uuid,
        pattern: &Regex,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.check_available()?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| pattern.is_match(&m.content) || pattern.is_match(m.sender.name()))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_flag(&self, flag: &FlagRecord) -> Result<()> {
        self.check_available()?;
        self.flags.write().await.push(flag.clone());
        Ok(())
    }

    async fn list_flags(&self, project_id: Uuid) -> Result<Vec<FlagRecord>> {
        self.check_available()?;
        Ok(self
            .flags
            .read()
            .await
            .iter()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_timeout(&self, timeout: &UserTimeout) -> Result<()> {
        self.check_available()?;
        self.timeouts.write().await.push(timeout.clone());
        Ok(())
    }

    async fn active_timeout(
        &self,
        project_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserTimeout>> {
        self.check_available()?;
        Ok(self
            .timeouts
            .read()
            .await
            .iter()
            .filter(|t| t.project_id == project_id && t.user_id == user_id && t.is_active_at(now))
            .max_by_key(|t| t.expires_at)
            .cloned())
    }

    async fn get_persona(&self, persona_id: &str) -> Result<Option<PersonaProfile>> {
        self.check_available()?;
        Ok(self.personas.read().await.get(persona_id).cloned())
    }

    async fn upsert_persona(&self, persona: &PersonaProfile) -> Result<()> {
        self.check_available()?;
        self.personas
            .write()
            .await
            .insert(persona.id.clone(), persona.clone());
        Ok(())
    }
}
