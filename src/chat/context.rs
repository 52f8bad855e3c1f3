//! Conversation context assembly for AI responders.
//!
//! Produces the last `window` messages verbatim, preceded by a single system
//! entry summarizing everything older. Summaries are cached per conversation
//! and summarized span, so personas with different windows never share one,
//! and are trusted only while the conversation revision is unchanged.

use super::error::{ChatError, ChatResult};
use super::generation::{GenerationOptions, TextGenerator};
use super::models::{ChatMessage, Conversation};
use crate::store::ChatStore;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sender label of the synthetic summary entry
pub const SUMMARY_SENDER: &str = "system";
const SUMMARY_PREFIX: &str = "Conversation Summary: ";
const SUMMARY_INSTRUCTION: &str = "Summarize the following classroom conversation in at most \
three sentences. Keep questions that are still open and decisions that were made.";

/// One `{sender, content}` line handed to an AI responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub sender: String,
    pub content: String,
}

impl ContextEntry {
    fn from_message(message: &ChatMessage) -> Self {
        Self {
            sender: message.sender.name().to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSummary {
    summary: String,
    revision: DateTime<Utc>,
}

pub struct ContextAssembler {
    store: Arc<dyn ChatStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    /// Keyed by conversation id and the number of older messages summarized
    cache: Cache<(Uuid, usize), CachedSummary>,
    default_window: usize,
    options: GenerationOptions,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ChatStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        cache_capacity: u64,
        default_window: usize,
        options: GenerationOptions,
    ) -> Self {
        Self {
            store,
            generator,
            cache: Cache::builder().max_capacity(cache_capacity).build(),
            default_window: default_window.max(1),
            options,
        }
    }

    /// Bounded context for `persona_id` answering in `project_id`
    pub async fn get_context_for_ai(
        &self,
        project_id: Uuid,
        persona_id: &str,
    ) -> ChatResult<Vec<ContextEntry>> {
        let window = self.window_for(persona_id).await?;

        let Some(conversation) = self
            .store
            .get_conversation_by_project(project_id)
            .await
            .map_err(ChatError::Persistence)?
        else {
            return Ok(Vec::new());
        };
        let messages = self
            .store
            .list_messages(conversation.id)
            .await
            .map_err(ChatError::Persistence)?;

        if messages.len() <= window {
            return Ok(messages.iter().map(ContextEntry::from_message).collect());
        }

        let (older, recent) = messages.split_at(messages.len() - window);
        let mut context = Vec::with_capacity(window + 1);
        if let Some(summary) = self.summary_for(&conversation, older).await {
            context.push(ContextEntry {
                sender: SUMMARY_SENDER.to_string(),
                content: format!("{}{}", SUMMARY_PREFIX, summary),
            });
        }
        context.extend(recent.iter().map(ContextEntry::from_message));
        Ok(context)
    }

    async fn window_for(&self, persona_id: &str) -> ChatResult<usize> {
        let persona = self
            .store
            .get_persona(persona_id)
            .await
            .map_err(ChatError::Persistence)?;
        Ok(persona
            .and_then(|p| p.context_window)
            .filter(|w| *w > 0)
            .unwrap_or(self.default_window))
    }

    /// Cached summary of the same span when the revision still matches, else
    /// a fresh one. `None` when summarization is unavailable or failed.
    async fn summary_for(&self, conversation: &Conversation, older: &[ChatMessage]) -> Option<String> {
        let key = (conversation.id, older.len());
        if let Some(cached) = self.cache.get(&key).await {
            if cached.revision == conversation.updated_at {
                debug!(
                    conversation_id = %conversation.id,
                    summarized = older.len(),
                    "Summary cache hit"
                );
                return Some(cached.summary);
            }
        }

        let generator = self.generator.as_ref()?;
        let prompt = summary_prompt(older);
        match generator.generate(&prompt, self.options).await {
            Ok(summary) => {
                let summary = summary.trim().to_string();
                self.cache
                    .insert(
                        key,
                        CachedSummary {
                            summary: summary.clone(),
                            revision: conversation.updated_at,
                        },
                    )
                    .await;
                debug!(
                    conversation_id = %conversation.id,
                    summarized = older.len(),
                    "Summary rebuilt"
                );
                Some(summary)
            }
            Err(e) => {
                let err = ChatError::Summarization(e);
                warn!(
                    conversation_id = %conversation.id,
                    error = %err,
                    "Summarization failed, continuing without summary"
                );
                None
            }
        }
    }
}

fn summary_prompt(messages: &[ChatMessage]) -> String {
    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.sender.name(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\n{}", SUMMARY_INSTRUCTION, transcript)
}
