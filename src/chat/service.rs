//! Message service: the single authoritative path for creating, threading,
//! searching and deleting chat messages.
//!
//! Every mutation of a project's conversation runs under that project's lock,
//! so thread bookkeeping (positions, root reply counts) is a serialized
//! read-modify-write and broadcasts leave in persistence order.

use super::error::{ChatError, ChatResult};
use super::models::*;
use super::moderation::{FlagRecord, ModerationGate, ModerationVerdict, UserTimeout};
use crate::auth::{Identity, Role};
use crate::events::{EventEmitter, ServerEvent};
use crate::store::ChatStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum message length in characters
pub const MAX_MESSAGE_CHARS: usize = 5000;
/// Maximum length of an auto-generated thread title
const THREAD_TITLE_CHARS: usize = 50;
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const TOP_SENDERS: usize = 5;
/// Compiled search patterns are capped to keep user-supplied regexes cheap
const SEARCH_REGEX_SIZE_LIMIT: usize = 1 << 20;
/// Longest timeout an instructor may impose
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;
/// Idle per-project locks are swept once the map grows past this size
const LOCK_PRUNE_THRESHOLD: usize = 1024;

pub struct MessageService {
    store: Arc<dyn ChatStore>,
    moderation: Arc<dyn ModerationGate>,
    emitter: Arc<dyn EventEmitter>,
    project_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        moderation: Arc<dyn ModerationGate>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            store,
            moderation,
            emitter,
            project_locks: DashMap::new(),
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Moderate, persist and broadcast a new top-level message
    pub async fn send_message(&self, draft: MessageDraft) -> ChatResult<ChatMessage> {
        validate_draft(&draft)?;
        let status = self.admit(&draft).await?;

        let _guard = self.lock_project(draft.project_id).await;
        let mut conversation = self.ensure_conversation(draft.project_id).await?;

        let message = ChatMessage::from_draft(conversation.id, draft, status);
        persist(self.store.insert_message(&message).await, "insert message")?;

        conversation.record_message(&message);
        persist(
            self.store.update_conversation(&conversation).await,
            "update conversation",
        )?;

        debug!(
            project_id = %message.project_id,
            message_id = %message.id,
            sender = message.sender.id(),
            "Message persisted"
        );
        self.emitter.emit_to_project(
            message.project_id,
            ServerEvent::ChatMessage {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    /// Promote an existing message to a thread root.
    ///
    /// Returns the message unchanged if it already is a root.
    pub async fn create_thread(
        &self,
        message_id: Uuid,
        title: Option<String>,
    ) -> ChatResult<ChatMessage> {
        let project_id = self.require_message(message_id).await?.project_id;
        let _guard = self.lock_project(project_id).await;

        let message = self.require_message(message_id).await?;
        if message.is_thread_root {
            return Ok(message);
        }
        if message.thread_id.is_some() {
            return Err(ChatError::validation(format!(
                "Message {} is a reply and cannot start a thread",
                message_id
            )));
        }

        let root = self.promote(message, Uuid::new_v4(), title).await?;
        self.touch_conversation(root.conversation_id).await?;
        info!(thread_id = ?root.thread_id, message_id = %root.id, "Thread created");
        Ok(root)
    }

    /// Reply to a message, starting a thread on the parent if needed
    pub async fn reply_to_message(
        &self,
        parent_id: Uuid,
        draft: MessageDraft,
    ) -> ChatResult<ChatMessage> {
        validate_draft(&draft)?;
        let parent = self.require_message(parent_id).await?;
        if parent.project_id != draft.project_id {
            return Err(ChatError::validation(
                "Reply must belong to the parent message's project",
            ));
        }
        let status = self.admit(&draft).await?;

        let _guard = self.lock_project(parent.project_id).await;
        let parent = self.require_message(parent_id).await?;

        let (parent, thread) = match parent.thread_id {
            Some(thread_id) => {
                let thread = persist(
                    self.store.get_thread_messages(thread_id).await,
                    "load thread",
                )?;
                (parent, thread)
            }
            None => {
                // The parent becomes the root and its own id names the thread
                let root = self.promote(parent, parent_id, None).await?;
                (root.clone(), vec![root])
            }
        };
        let thread_id = parent.thread_id.ok_or_else(|| {
            ChatError::Persistence(anyhow::anyhow!("parent {} lost its thread id", parent_id))
        })?;

        let mut root = thread
            .iter()
            .find(|m| m.is_thread_root)
            .cloned()
            .ok_or_else(|| {
                ChatError::Persistence(anyhow::anyhow!("thread {} has no root", thread_id))
            })?;
        let next_position = thread.iter().map(|m| m.thread_position).max().unwrap_or(0) + 1;

        let mut reply = ChatMessage::from_draft(parent.conversation_id, draft, status);
        reply.parent_message_id = Some(parent.id);
        reply.thread_id = Some(thread_id);
        reply.thread_depth = parent.thread_depth + 1;
        reply.thread_position = next_position;

        persist(self.store.insert_message(&reply).await, "insert reply")?;

        root.thread_message_count += 1;
        persist(self.store.update_message(&root).await, "update thread root")?;

        let mut conversation = self.require_conversation_by_id(reply.conversation_id).await?;
        conversation.record_message(&reply);
        persist(
            self.store.update_conversation(&conversation).await,
            "update conversation",
        )?;

        debug!(
            thread_id = %thread_id,
            message_id = %reply.id,
            depth = reply.thread_depth,
            position = reply.thread_position,
            "Reply persisted"
        );
        self.emitter.emit_to_project(
            reply.project_id,
            ServerEvent::ChatMessage {
                message: reply.clone(),
            },
        );
        Ok(reply)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All messages of a thread, ordered by position
    pub async fn get_thread_messages(&self, thread_id: Uuid) -> ChatResult<Vec<ChatMessage>> {
        persist(
            self.store.get_thread_messages(thread_id).await,
            "load thread",
        )
    }

    /// Thread roots of a project, newest first
    pub async fn get_thread_list(
        &self,
        project_id: Uuid,
        limit: Option<usize>,
        offset: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let Some(conversation) = self.conversation_for(project_id).await? else {
            return Ok(Vec::new());
        };
        persist(
            self.store
                .list_thread_roots(conversation.id, page_size(limit), offset)
                .await,
            "list thread roots",
        )
    }

    /// Case-insensitive search over content and sender names.
    ///
    /// The query is used as a regular expression when it compiles, otherwise
    /// as a literal substring. An empty query yields no results.
    pub async fn search_messages(
        &self,
        project_id: Uuid,
        query: &str,
        limit: Option<usize>,
    ) -> ChatResult<Vec<ChatMessage>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let Some(conversation) = self.conversation_for(project_id).await? else {
            return Ok(Vec::new());
        };
        let pattern = search_pattern(query)?;
        persist(
            self.store
                .search_messages(conversation.id, &pattern, page_size(limit))
                .await,
            "search messages",
        )
    }

    /// Aggregate activity over an optional `[start, end]` range
    pub async fn get_chat_statistics(
        &self,
        project_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ChatResult<ChatStatistics> {
        let Some(conversation) = self.conversation_for(project_id).await? else {
            return Ok(ChatStatistics::default());
        };
        let messages = persist(
            self.store.list_messages(conversation.id).await,
            "list messages",
        )?;

        let in_range = messages.iter().filter(|m| {
            start.is_none_or(|s| m.created_at >= s) && end.is_none_or(|e| m.created_at <= e)
        });

        let mut stats = ChatStatistics::default();
        let mut per_sender: HashMap<&str, SenderActivity> = HashMap::new();
        for message in in_range {
            stats.total_messages += 1;
            *stats
                .message_types
                .entry(message.message_type.as_str().to_string())
                .or_insert(0) += 1;
            per_sender
                .entry(message.sender.id())
                .or_insert_with(|| SenderActivity {
                    sender_id: message.sender.id().to_string(),
                    sender_name: message.sender.name().to_string(),
                    message_count: 0,
                })
                .message_count += 1;
        }

        stats.unique_senders = per_sender.len() as u64;
        let mut ranked: Vec<SenderActivity> = per_sender.into_values().collect();
        ranked.sort_by(|a, b| {
            b.message_count
                .cmp(&a.message_count)
                .then_with(|| a.sender_name.cmp(&b.sender_name))
        });
        ranked.truncate(TOP_SENDERS);
        stats.top_senders = ranked;
        Ok(stats)
    }

    /// The project's conversation, if any message was ever sent
    pub async fn conversation_for(&self, project_id: Uuid) -> ChatResult<Option<Conversation>> {
        persist(
            self.store.get_conversation_by_project(project_id).await,
            "load conversation",
        )
    }

    pub async fn list_flags(&self, project_id: Uuid) -> ChatResult<Vec<FlagRecord>> {
        persist(self.store.list_flags(project_id).await, "list flags")
    }

    // ========================================================================
    // Mutations by moderators and participants
    // ========================================================================

    /// Delete a message. Deleting a thread root removes the whole thread.
    ///
    /// Returns `Ok(false)` when the message does not exist.
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        actor_id: &str,
        actor_role: Role,
    ) -> ChatResult<bool> {
        if !actor_role.can_moderate() {
            return Err(ChatError::PermissionDenied(format!(
                "role '{}' cannot delete messages",
                actor_role
            )));
        }

        let Some(message) = persist(self.store.get_message(message_id).await, "load message")?
        else {
            return Ok(false);
        };
        let _guard = self.lock_project(message.project_id).await;
        let Some(message) = persist(self.store.get_message(message_id).await, "load message")?
        else {
            return Ok(false);
        };

        let doomed: Vec<Uuid> = match message.thread_id {
            Some(thread_id) if message.is_thread_root => persist(
                self.store.get_thread_messages(thread_id).await,
                "load thread",
            )?
            .iter()
            .map(|m| m.id)
            .collect(),
            Some(thread_id) => {
                let thread = persist(
                    self.store.get_thread_messages(thread_id).await,
                    "load thread",
                )?;
                if let Some(mut root) = thread.into_iter().find(|m| m.is_thread_root) {
                    root.thread_message_count = root.thread_message_count.saturating_sub(1);
                    persist(self.store.update_message(&root).await, "update thread root")?;
                }
                vec![message.id]
            }
            None => vec![message.id],
        };

        let removed = persist(
            self.store.delete_messages(&doomed).await,
            "delete messages",
        )?;
        if let Some(mut conversation) = persist(
            self.store.get_conversation(message.conversation_id).await,
            "load conversation",
        )? {
            conversation.record_removal(removed);
            let preview_removed = conversation
                .last_message
                .as_ref()
                .is_some_and(|last| doomed.contains(&last.message_id));
            if preview_removed {
                let remaining = persist(
                    self.store.list_messages(conversation.id).await,
                    "list messages",
                )?;
                conversation.last_message = remaining.last().map(LastMessage::from_message);
            }
            persist(
                self.store.update_conversation(&conversation).await,
                "update conversation",
            )?;
        }

        info!(
            message_id = %message_id,
            actor_id,
            removed,
            "Message deleted"
        );
        for id in doomed {
            self.emitter
                .emit_to_all(ServerEvent::MessageDeleted { message_id: id });
        }
        Ok(true)
    }

    /// Reset a participant's unread counter
    pub async fn mark_as_read(&self, project_id: Uuid, user_id: &str) -> ChatResult<()> {
        let _guard = self.lock_project(project_id).await;
        if let Some(mut conversation) = self.conversation_for(project_id).await? {
            conversation.mark_read(user_id);
            persist(
                self.store.update_conversation(&conversation).await,
                "update conversation",
            )?;
        }
        Ok(())
    }

    /// Bar a user from sending in a project for `duration_secs`
    pub async fn timeout_user(
        &self,
        project_id: Uuid,
        target_user_id: &str,
        duration_secs: u64,
        reason: Option<String>,
        actor: &Identity,
    ) -> ChatResult<UserTimeout> {
        if !actor.role.can_moderate() {
            return Err(ChatError::PermissionDenied(format!(
                "role '{}' cannot time out users",
                actor.role
            )));
        }
        if duration_secs == 0 || duration_secs > MAX_TIMEOUT_SECS {
            return Err(ChatError::validation(format!(
                "Timeout duration must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }

        let now = Utc::now();
        let timeout = UserTimeout {
            id: Uuid::new_v4(),
            project_id,
            user_id: target_user_id.to_string(),
            reason,
            issued_by: actor.user_id.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(duration_secs as i64),
        };
        persist(self.store.insert_timeout(&timeout).await, "insert timeout")?;
        info!(
            project_id = %project_id,
            user_id = target_user_id,
            until = %timeout.expires_at,
            "User timed out"
        );
        Ok(timeout)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn lock_project(&self, project_id: Uuid) -> OwnedMutexGuard<()> {
        if self.project_locks.len() > LOCK_PRUNE_THRESHOLD {
            self.prune_idle_locks();
        }
        let lock = self.project_locks.entry(project_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop per-project locks nobody holds or waits on. An entry whose only
    /// owner is the map is not in use.
    fn prune_idle_locks(&self) {
        let before = self.project_locks.len();
        self.project_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(
            before,
            after = self.project_locks.len(),
            "Pruned idle project locks"
        );
    }

    /// Timeout check + moderation verdict. Returns the status to persist with.
    async fn admit(&self, draft: &MessageDraft) -> ChatResult<ModerationStatus> {
        let sender_id = draft.sender.id();
        if let Some(timeout) = persist(
            self.store
                .active_timeout(draft.project_id, sender_id, Utc::now())
                .await,
            "check timeout",
        )? {
            debug!(user_id = sender_id, until = %timeout.expires_at, "Sender is timed out");
            return Err(ChatError::TimedOutUser {
                until: timeout.expires_at,
            });
        }

        let verdict = match self.moderation.analyze(&draft.content).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Moderation gate unavailable, admitting message");
                ModerationVerdict::clean()
            }
        };

        if verdict.blocks() {
            info!(
                project_id = %draft.project_id,
                user_id = sender_id,
                categories = ?verdict.categories,
                "Message blocked by moderation"
            );
            return Err(ChatError::ModerationBlocked {
                categories: verdict.categories,
            });
        }

        if verdict.flags() {
            // The message id does not exist yet; the flag gets a provisional one.
            let flag = FlagRecord {
                id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
                project_id: draft.project_id,
                user_id: sender_id.to_string(),
                content: draft.content.clone(),
                severity: verdict.severity,
                categories: verdict.categories,
                created_at: Utc::now(),
            };
            persist(self.store.insert_flag(&flag).await, "insert flag")?;
            warn!(
                project_id = %draft.project_id,
                user_id = sender_id,
                flag_id = %flag.id,
                "Message flagged for review"
            );
            return Ok(ModerationStatus::Flagged);
        }

        Ok(ModerationStatus::Approved)
    }

    /// Caller must hold the project lock
    async fn ensure_conversation(&self, project_id: Uuid) -> ChatResult<Conversation> {
        if let Some(existing) = self.conversation_for(project_id).await? {
            return Ok(existing);
        }
        let conversation = Conversation::new(project_id);
        persist(
            self.store.create_conversation(&conversation).await,
            "create conversation",
        )?;
        info!(project_id = %project_id, conversation_id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    /// Caller must hold the project lock
    async fn promote(
        &self,
        mut message: ChatMessage,
        thread_id: Uuid,
        title: Option<String>,
    ) -> ChatResult<ChatMessage> {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| message.content.chars().take(THREAD_TITLE_CHARS).collect());

        message.is_thread_root = true;
        message.thread_id = Some(thread_id);
        message.thread_title = Some(title);
        message.thread_depth = 0;
        message.thread_position = 0;
        message.thread_message_count = 0;
        persist(
            self.store.update_message(&message).await,
            "promote thread root",
        )?;
        Ok(message)
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> ChatResult<()> {
        let mut conversation = self.require_conversation_by_id(conversation_id).await?;
        conversation.bump_revision();
        persist(
            self.store.update_conversation(&conversation).await,
            "update conversation",
        )
    }

    async fn require_message(&self, id: Uuid) -> ChatResult<ChatMessage> {
        persist(self.store.get_message(id).await, "load message")?
            .ok_or_else(|| ChatError::NotFound(format!("Message {} not found", id)))
    }

    async fn require_conversation_by_id(&self, id: Uuid) -> ChatResult<Conversation> {
        persist(self.store.get_conversation(id).await, "load conversation")?
            .ok_or_else(|| ChatError::NotFound(format!("Conversation {} not found", id)))
    }
}

fn persist<T>(result: anyhow::Result<T>, operation: &str) -> ChatResult<T> {
    result.map_err(|e| {
        error!(operation, error = %e, "Chat store operation failed");
        ChatError::Persistence(e.context(format!("Failed to {}", operation)))
    })
}

fn validate_draft(draft: &MessageDraft) -> ChatResult<()> {
    let content = draft.content.trim();
    let has_attachment = draft.metadata.is_some()
        && matches!(draft.message_type, MessageType::File | MessageType::Link);
    if content.is_empty() && !has_attachment {
        return Err(ChatError::validation("Message content is empty"));
    }
    if draft.content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::validation(format!(
            "Message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn search_pattern(query: &str) -> ChatResult<Regex> {
    RegexBuilder::new(query)
        .case_insensitive(true)
        .size_limit(SEARCH_REGEX_SIZE_LIMIT)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(query))
                .case_insensitive(true)
                .build()
        })
        .map_err(|e| ChatError::validation(format!("Invalid search query: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::moderation::Severity;
    use crate::events::{RoomEvent, Target};
    use crate::test_helpers::{
        instructor_identity, student, test_service, ScriptedModeration, TestService,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<RoomEvent>) -> Vec<RoomEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => out.push(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    async fn send(svc: &TestService, project: Uuid, who: &str, text: &str) -> ChatMessage {
        svc.service
            .send_message(MessageDraft::text(project, student(who), text))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_creates_conversation_lazily_and_broadcasts() {
        let svc = test_service();
        let mut rx = svc.bus.subscribe();
        let project = Uuid::new_v4();

        assert!(svc.service.conversation_for(project).await.unwrap().is_none());
        let msg = send(&svc, project, "ada", "hello class").await;

        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert_eq!(conv.message_count, 1);
        assert_eq!(msg.conversation_id, conv.id);
        assert_eq!(msg.moderation_status, ModerationStatus::Approved);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Room(crate::events::Room::Project(project)));
        assert_eq!(events[0].event, ServerEvent::ChatMessage { message: msg });
    }

    #[tokio::test]
    async fn test_high_severity_is_blocked_and_not_persisted() {
        let svc = test_service();
        svc.moderation.set_severity(Severity::High);
        let mut rx = svc.bus.subscribe();
        let project = Uuid::new_v4();

        let err = svc
            .service
            .send_message(MessageDraft::text(project, student("ada"), "bad words"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::ModerationBlocked { .. }));
        assert!(svc.store.messages.read().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_medium_severity_persists_and_flags() {
        let svc = test_service();
        svc.moderation.set_severity(Severity::Medium);
        let project = Uuid::new_v4();

        let msg = send(&svc, project, "ada", "borderline").await;
        assert_eq!(msg.moderation_status, ModerationStatus::Flagged);

        let flags = svc.service.list_flags(project).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].user_id, "ada");
        // Flag is correlated to a provisional id, not the stored message
        assert_ne!(flags[0].message_id, msg.id);
    }

    #[tokio::test]
    async fn test_moderation_outage_admits_message() {
        let svc = test_service();
        svc.moderation.set_failing(true);
        let msg = send(&svc, Uuid::new_v4(), "ada", "hello").await;
        assert_eq!(msg.moderation_status, ModerationStatus::Approved);
    }

    #[tokio::test]
    async fn test_timed_out_user_rejected() {
        let svc = test_service();
        let project = Uuid::new_v4();
        svc.service
            .timeout_user(project, "ada", 600, Some("spam".into()), &instructor_identity())
            .await
            .unwrap();

        let err = svc
            .service
            .send_message(MessageDraft::text(project, student("ada"), "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TimedOutUser { .. }));
        assert!(svc.store.messages.read().await.is_empty());
        // Moderation never consulted for timed-out senders
        assert_eq!(svc.moderation.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_requires_moderator() {
        let svc = test_service();
        let mut actor = instructor_identity();
        actor.role = Role::Student;
        let err = svc
            .service
            .timeout_user(Uuid::new_v4(), "ada", 60, None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let svc = test_service();
        let err = svc
            .service
            .send_message(MessageDraft::text(Uuid::new_v4(), student("ada"), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces() {
        let svc = test_service();
        svc.store.set_unavailable(true);
        let err = svc
            .service
            .send_message(MessageDraft::text(Uuid::new_v4(), student("ada"), "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Persistence(_)));
        assert!(!err.is_business_rejection());
    }

    #[tokio::test]
    async fn test_reply_chain_depth_and_positions() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let root = send(&svc, project, "ada", "What is a closure?").await;

        let r1 = svc
            .service
            .reply_to_message(root.id, MessageDraft::text(project, student("bob"), "A fn + env"))
            .await
            .unwrap();
        let r2 = svc
            .service
            .reply_to_message(r1.id, MessageDraft::text(project, student("ada"), "Thanks"))
            .await
            .unwrap();
        let r3 = svc
            .service
            .reply_to_message(root.id, MessageDraft::text(project, student("cy"), "+1"))
            .await
            .unwrap();

        // Implicit promotion uses the parent's own id as thread id
        assert_eq!(r1.thread_id, Some(root.id));
        assert_eq!(r1.thread_depth, 1);
        assert_eq!(r2.thread_depth, 2);
        assert_eq!(r3.thread_depth, 1);
        assert_eq!(r2.parent_message_id, Some(r1.id));

        let thread = svc.service.get_thread_messages(root.id).await.unwrap();
        let positions: Vec<u32> = thread.iter().map(|m| m.thread_position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(thread.iter().filter(|m| m.is_thread_root).count(), 1);

        let stored_root = &thread[0];
        assert!(stored_root.is_thread_root);
        assert_eq!(stored_root.thread_message_count, 3);
        assert_eq!(
            stored_root.thread_message_count as usize,
            thread.iter().filter(|m| !m.is_thread_root).count()
        );
    }

    #[tokio::test]
    async fn test_create_thread_is_idempotent() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let msg = send(&svc, project, "ada", "Homework question about recursion").await;

        let first = svc
            .service
            .create_thread(msg.id, Some("Recursion".into()))
            .await
            .unwrap();
        let second = svc
            .service
            .create_thread(msg.id, Some("Other".into()))
            .await
            .unwrap();

        assert!(first.is_thread_root);
        assert_eq!(first.thread_title.as_deref(), Some("Recursion"));
        assert_eq!(first.thread_id, second.thread_id);
        assert_eq!(second.thread_title.as_deref(), Some("Recursion"));
    }

    #[tokio::test]
    async fn test_create_thread_bumps_revision() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let msg = send(&svc, project, "ada", "question").await;
        let before = svc.service.conversation_for(project).await.unwrap().unwrap();
        svc.service.create_thread(msg.id, None).await.unwrap();
        let after = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_create_thread_on_reply_rejected() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let root = send(&svc, project, "ada", "q").await;
        let reply = svc
            .service
            .reply_to_message(root.id, MessageDraft::text(project, student("bob"), "a"))
            .await
            .unwrap();
        let err = svc.service.create_thread(reply.id, None).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_thread_unknown_message() {
        let svc = test_service();
        let err = svc
            .service
            .create_thread(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_replies_keep_count_consistent() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let root = send(&svc, project, "ada", "root").await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = svc.service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .reply_to_message(
                        root.id,
                        MessageDraft::text(project, student(&format!("s{}", i)), "reply"),
                    )
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let thread = svc.service.get_thread_messages(root.id).await.unwrap();
        assert_eq!(thread.len(), 21);
        assert_eq!(thread[0].thread_message_count, 20);
        let mut positions: Vec<u32> = thread.iter().map(|m| m.thread_position).collect();
        positions.dedup();
        assert_eq!(positions.len(), 21, "positions must be unique");
    }

    #[tokio::test]
    async fn test_thread_list_newest_first_paginated() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let mut roots = Vec::new();
        for i in 0..3 {
            let m = send(&svc, project, "ada", &format!("topic {}", i)).await;
            svc.service.create_thread(m.id, None).await.unwrap();
            roots.push(m.id);
        }
        send(&svc, project, "bob", "not a thread").await;

        let page = svc.service.get_thread_list(project, Some(2), 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, roots[2]);
        assert_eq!(page[1].id, roots[1]);

        let rest = svc.service.get_thread_list(project, Some(2), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, roots[0]);

        assert!(svc
            .service
            .get_thread_list(Uuid::new_v4(), None, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_search() {
        let svc = test_service();
        let project = Uuid::new_v4();
        send(&svc, project, "ada", "Mitochondria is the powerhouse").await;
        send(&svc, project, "bob", "lunch at noon?").await;
        send(&svc, project, "cy", "mitochondria again").await;

        let hits = svc
            .service
            .search_messages(project, "MITOCHONDRIA", Some(10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let limited = svc
            .service
            .search_messages(project, "mito", Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        // Matches sender display name
        let by_name = svc.service.search_messages(project, "Bob", None).await.unwrap();
        assert_eq!(by_name.len(), 1);

        // Invalid regex falls back to literal match
        let literal = svc.service.search_messages(project, "noon?(", None).await;
        assert!(literal.unwrap().is_empty());

        assert!(svc.service.search_messages(project, "  ", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_moderator_role() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let msg = send(&svc, project, "ada", "oops").await;

        let err = svc
            .service
            .delete_message(msg.id, "ada", Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
        assert!(svc.store.get_message(msg.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_broadcasts_globally() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let msg = send(&svc, project, "ada", "oops").await;
        let mut rx = svc.bus.subscribe();

        assert!(svc
            .service
            .delete_message(msg.id, "instr-1", Role::Instructor)
            .await
            .unwrap());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Everyone);
        assert_eq!(
            events[0].event,
            ServerEvent::MessageDeleted { message_id: msg.id }
        );
        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert_eq!(conv.message_count, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_returns_false() {
        let svc = test_service();
        assert!(!svc
            .service
            .delete_message(Uuid::new_v4(), "instr-1", Role::Instructor)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_reply_decrements_root_count() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let root = send(&svc, project, "ada", "root").await;
        let reply = svc
            .service
            .reply_to_message(root.id, MessageDraft::text(project, student("bob"), "r"))
            .await
            .unwrap();

        svc.service
            .delete_message(reply.id, "admin", Role::Administrator)
            .await
            .unwrap();
        let thread = svc.service.get_thread_messages(root.id).await.unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].thread_message_count, 0);
    }

    #[tokio::test]
    async fn test_delete_root_removes_thread() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let root = send(&svc, project, "ada", "root").await;
        svc.service
            .reply_to_message(root.id, MessageDraft::text(project, student("bob"), "r"))
            .await
            .unwrap();
        let mut rx = svc.bus.subscribe();

        svc.service
            .delete_message(root.id, "instr-1", Role::Instructor)
            .await
            .unwrap();
        assert!(svc.service.get_thread_messages(root.id).await.unwrap().is_empty());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_newest_refreshes_preview() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let first = send(&svc, project, "ada", "first").await;
        let second = send(&svc, project, "bob", "second").await;

        svc.service
            .delete_message(second.id, "instr-1", Role::Instructor)
            .await
            .unwrap();
        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        let preview = conv.last_message.expect("preview of remaining message");
        assert_eq!(preview.message_id, first.id);

        svc.service
            .delete_message(first.id, "instr-1", Role::Instructor)
            .await
            .unwrap();
        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert!(conv.last_message.is_none());
    }

    #[tokio::test]
    async fn test_delete_older_keeps_preview() {
        let svc = test_service();
        let project = Uuid::new_v4();
        let first = send(&svc, project, "ada", "first").await;
        let second = send(&svc, project, "bob", "second").await;

        svc.service
            .delete_message(first.id, "instr-1", Role::Instructor)
            .await
            .unwrap();
        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert_eq!(conv.last_message.unwrap().message_id, second.id);
    }

    #[tokio::test]
    async fn test_idle_project_locks_are_pruned() {
        let svc = test_service();
        for _ in 0..5 {
            send(&svc, Uuid::new_v4(), "ada", "hi").await;
        }
        assert_eq!(svc.service.project_locks.len(), 5);

        let busy = Uuid::new_v4();
        let guard = svc.service.lock_project(busy).await;
        svc.service.prune_idle_locks();
        assert_eq!(svc.service.project_locks.len(), 1);
        assert!(svc.service.project_locks.contains_key(&busy));

        drop(guard);
        svc.service.prune_idle_locks();
        assert!(svc.service.project_locks.is_empty());
    }

    #[tokio::test]
    async fn test_statistics() {
        let svc = test_service();
        let project = Uuid::new_v4();

        let empty = svc
            .service
            .get_chat_statistics(project, None, None)
            .await
            .unwrap();
        assert_eq!(empty, ChatStatistics::default());

        for _ in 0..3 {
            send(&svc, project, "ada", "hi").await;
        }
        send(&svc, project, "bob", "hey").await;
        svc.service
            .send_message(
                MessageDraft::text(project, student("bob"), "see attached")
                    .with_type(MessageType::File)
                    .with_metadata(MessageMetadata {
                        file_name: Some("notes.pdf".into()),
                        ..Default::default()
                    }),
            )
            .await
            .unwrap();

        let stats = svc
            .service
            .get_chat_statistics(project, None, None)
            .await
            .unwrap();
        assert_eq!(stats.total_messages, 5);
        assert_eq!(stats.unique_senders, 2);
        assert_eq!(stats.message_types.get("text"), Some(&4));
        assert_eq!(stats.message_types.get("file"), Some(&1));
        assert_eq!(stats.top_senders[0].sender_id, "ada");
        assert_eq!(stats.top_senders[0].message_count, 3);

        let future = Utc::now() + chrono::Duration::hours(1);
        let none = svc
            .service
            .get_chat_statistics(project, Some(future), None)
            .await
            .unwrap();
        assert_eq!(none.total_messages, 0);
    }

    #[tokio::test]
    async fn test_mark_as_read() {
        let svc = test_service();
        let project = Uuid::new_v4();
        send(&svc, project, "ada", "one").await;
        send(&svc, project, "bob", "two").await;

        svc.service.mark_as_read(project, "ada").await.unwrap();
        let conv = svc.service.conversation_for(project).await.unwrap().unwrap();
        assert_eq!(conv.unread_counts.get("ada"), Some(&0));

        // No conversation yet is not an error
        svc.service.mark_as_read(Uuid::new_v4(), "ada").await.unwrap();
    }

    #[tokio::test]
    async fn test_scripted_moderation_sees_content() {
        let moderation = ScriptedModeration::default();
        let svc = crate::test_helpers::test_service_with(moderation.clone());
        send(&svc, Uuid::new_v4(), "ada", "inspect me").await;
        assert_eq!(moderation.calls(), 1);
        assert_eq!(moderation.last_content().as_deref(), Some("inspect me"));
    }
}
