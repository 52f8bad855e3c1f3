//! Connection gateway core: handshake, room membership, rate limiting and
//! routing of inbound client events.
//!
//! Transport-agnostic. The WebSocket handler owns a [`Session`], feeds it
//! parsed [`ClientEvent`]s through [`Gateway::dispatch`] and drains the
//! session outbox plus room broadcasts back to the socket.

use super::protocol::ClientEvent;
use super::rate_limit::RateLimiter;
use super::session::Session;
use crate::auth::{Identity, TokenVerifier};
use crate::chat::{parse_id, ChatError, MessageDraft, MessageService};
use crate::events::{Room, ServerEvent, SessionUser};
use crate::presence::{PresenceStatus, PresenceTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub rate_limit_max_events: u32,
    pub rate_limit_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_events: 100,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    verifier: Arc<dyn TokenVerifier>,
    messages: Arc<MessageService>,
    presence: Arc<PresenceTracker>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        messages: Arc<MessageService>,
        presence: Arc<PresenceTracker>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            verifier,
            messages,
            presence,
            config,
        }
    }

    pub fn open_session(&self, outbox: mpsc::UnboundedSender<ServerEvent>) -> Session {
        let limiter = RateLimiter::new(
            self.config.rate_limit_max_events,
            self.config.rate_limit_window,
        );
        let session = Session::new(limiter, outbox);
        debug!(session_id = %session.id, "Session opened");
        session
    }

    /// Verify a credential without touching any session
    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, ChatError> {
        self.verifier
            .verify(token)
            .map_err(|e| ChatError::Authentication(e.to_string()))
    }

    /// Verify a credential and, on success, bind it to the session.
    /// A failed handshake leaves the session without identity or rooms.
    pub fn handshake(&self, session: &mut Session, token: Option<&str>) -> Result<(), ChatError> {
        let identity = self.authenticate(token)?;
        self.attach(session, identity);
        Ok(())
    }

    /// Bind an already verified identity and auto-join its personal rooms
    pub fn attach(&self, session: &mut Session, identity: Identity) {
        session.join(Room::User(identity.user_id.clone()));
        session.join(Room::Role(identity.role.as_str().to_string()));
        session.send(ServerEvent::AuthOk {
            user: SessionUser {
                id: identity.user_id.clone(),
                email: identity.email.clone(),
                name: identity.name.clone(),
                role: identity.role.as_str().to_string(),
            },
        });
        info!(
            session_id = %session.id,
            user_id = %identity.user_id,
            role = %identity.role,
            "Session authenticated"
        );
        session.set_identity(identity);
    }

    /// Route one inbound event. Errors go to this session only.
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        if !session.limiter.check() {
            debug!(
                session_id = %session.id,
                event = event.name(),
                count = session.limiter.count(),
                "Rate limit exceeded"
            );
            session.send(ServerEvent::error(&ChatError::RateLimitExceeded {
                limit: session.limiter.max_events(),
                window_secs: session.limiter.window().as_secs(),
            }));
            return;
        }

        match event {
            ClientEvent::Auth { token } => {
                if session.is_authenticated() {
                    debug!(session_id = %session.id, "Ignoring repeated auth");
                    return;
                }
                if let Err(e) = self.handshake(session, Some(&token)) {
                    debug!(session_id = %session.id, error = %e, "Handshake rejected");
                    session.send(ServerEvent::error(&e));
                }
            }
            ClientEvent::JoinProject { project_id } => {
                let result = self.require_project(session, &project_id).map(|pid| {
                    session.join(Room::Project(pid));
                    pid
                });
                match result {
                    Ok(project_id) => {
                        debug!(session_id = %session.id, project_id = %project_id, "Joined project");
                        session.send(ServerEvent::JoinedProject { project_id });
                    }
                    Err(e) => session.send(ServerEvent::error(&e)),
                }
            }
            ClientEvent::LeaveProject { project_id } => {
                let result = self.require_project(session, &project_id).map(|pid| {
                    session.leave(&Room::Project(pid));
                    pid
                });
                match result {
                    Ok(project_id) => {
                        debug!(session_id = %session.id, project_id = %project_id, "Left project");
                        session.send(ServerEvent::LeftProject { project_id });
                    }
                    Err(e) => session.send(ServerEvent::error(&e)),
                }
            }
            ClientEvent::ChatMessage {
                project_id,
                message,
                message_type,
                metadata,
            } => {
                let project_id = match self.require_project(session, &project_id) {
                    Ok(pid) => pid,
                    Err(e) => {
                        session.send(ServerEvent::error(&e));
                        return;
                    }
                };
                let Some(identity) = session.identity() else {
                    return;
                };

                let draft = MessageDraft::text(project_id, identity.as_sender(), message)
                    .with_type(message_type.unwrap_or_default());
                let draft = match metadata {
                    Some(metadata) => draft.with_metadata(metadata),
                    None => draft,
                };
                self.spawn_send(session, draft);
            }
            ClientEvent::TypingStart { project_id } => {
                if let Some((pid, identity)) = self.presence_target(session, &project_id) {
                    self.presence
                        .handle_typing_start(pid, &identity.user_id, &identity.name);
                }
            }
            ClientEvent::TypingStop { project_id } => {
                if let Some((pid, identity)) = self.presence_target(session, &project_id) {
                    self.presence
                        .handle_typing_stop(pid, &identity.user_id, &identity.name);
                }
            }
            ClientEvent::PresenceUpdate { project_id, status } => {
                if let Some((pid, identity)) = self.presence_target(session, &project_id) {
                    self.presence.handle_presence_update(
                        pid,
                        &identity.user_id,
                        &identity.name,
                        status,
                    );
                }
            }
        }
    }

    /// Announce the session's departure to every project room it was in
    pub fn disconnect(&self, session: &Session) {
        if let Some(identity) = session.identity() {
            for project_id in session.project_ids() {
                if self
                    .presence
                    .typing_users(project_id)
                    .contains(&identity.user_id)
                {
                    self.presence
                        .handle_typing_stop(project_id, &identity.user_id, &identity.name);
                }
                self.presence.handle_presence_update(
                    project_id,
                    &identity.user_id,
                    &identity.name,
                    PresenceStatus::Offline,
                );
            }
        }
        info!(session_id = %session.id, rooms = session.rooms().len(), "Session closed");
    }

    /// Persist and broadcast outside the connection task so a disconnect
    /// mid-send does not cancel it. Only the ack or error is session-bound.
    fn spawn_send(&self, session: &Session, draft: MessageDraft) {
        let messages = self.messages.clone();
        let outbox = session.outbox();
        let session_id = session.id;

        tokio::spawn(async move {
            let event = match messages.send_message(draft).await {
                Ok(message) => ServerEvent::MessageSent {
                    message_id: message.id,
                    timestamp: message.created_at.to_rfc3339(),
                },
                Err(e) => {
                    if e.is_business_rejection() {
                        debug!(session_id = %session_id, code = e.code(), "Chat message rejected");
                    } else {
                        warn!(session_id = %session_id, error = %e, "Chat message failed");
                    }
                    ServerEvent::error(&e)
                }
            };
            let _ = outbox.send(event);
        });
    }

    fn require_project(&self, session: &Session, raw: &str) -> Result<Uuid, ChatError> {
        if !session.is_authenticated() {
            return Err(ChatError::Authentication(
                "Session is not authenticated".to_string(),
            ));
        }
        parse_id(raw, "project id")
    }

    /// Typing and presence are silent no-ops for unauthenticated sessions
    fn presence_target<'s>(&self, session: &'s Session, raw: &str) -> Option<(Uuid, &'s Identity)> {
        let identity = session.identity()?;
        match parse_id(raw, "project id") {
            Ok(pid) => Some((pid, identity)),
            Err(e) => {
                session.send(ServerEvent::error(&e));
                None
            }
        }
    }
}
