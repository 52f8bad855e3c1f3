//! Outbound gateway events and their broadcast targets

use crate::chat::models::ChatMessage;
use crate::presence::PresenceStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A named broadcast group a session can belong to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Room {
    User(String),
    Role(String),
    Project(Uuid),
}

impl Room {
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            Room::Project(id) => Some(*id),
            Room::User(_) | Room::Role(_) => None,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{}", id),
            Room::Role(role) => write!(f, "role:{}", role),
            Room::Project(id) => write!(f, "project:{}", id),
        }
    }
}

/// Who receives a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(Room),
    /// Every connected session
    Everyone,
}

/// User summary sent in `auth-ok`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// Events pushed from the server to clients.
///
/// Serialized as `{"type": "user-typing", "projectId": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    AuthOk {
        user: SessionUser,
    },
    JoinedProject {
        project_id: Uuid,
    },
    LeftProject {
        project_id: Uuid,
    },
    ChatMessage {
        message: ChatMessage,
    },
    /// Acknowledgement to the sender of a chat message
    MessageSent {
        message_id: Uuid,
        timestamp: String,
    },
    UserTyping {
        project_id: Uuid,
        user_id: String,
        user_name: String,
    },
    UserStoppedTyping {
        project_id: Uuid,
        user_id: String,
        user_name: String,
    },
    UserPresence {
        project_id: Uuid,
        user_id: String,
        user_name: String,
        status: PresenceStatus,
        timestamp: String,
    },
    MessageDeleted {
        message_id: Uuid,
    },
    Error {
        message: String,
        code: String,
    },
}

impl ServerEvent {
    pub fn error(err: &crate::chat::ChatError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AuthOk { .. } => "auth-ok",
            ServerEvent::JoinedProject { .. } => "joined-project",
            ServerEvent::LeftProject { .. } => "left-project",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::MessageSent { .. } => "message-sent",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::UserStoppedTyping { .. } => "user-stopped-typing",
            ServerEvent::UserPresence { .. } => "user-presence",
            ServerEvent::MessageDeleted { .. } => "message-deleted",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// A server event paired with its broadcast target.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub target: Target,
    pub event: ServerEvent,
}

/// Fan-out sink for server events
pub trait EventEmitter: Send + Sync {
    /// Broadcast an event. Fire-and-forget: never blocks, never fails.
    fn emit(&self, target: Target, event: ServerEvent);

    fn emit_to_room(&self, room: Room, event: ServerEvent) {
        self.emit(Target::Room(room), event);
    }

    fn emit_to_project(&self, project_id: Uuid, event: ServerEvent) {
        self.emit(Target::Room(Room::Project(project_id)), event);
    }

    fn emit_to_all(&self, event: ServerEvent) {
        self.emit(Target::Everyone, event);
    }
}
