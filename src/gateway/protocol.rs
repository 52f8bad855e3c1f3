//! Inbound client events
//!
//! Clients send JSON text frames tagged by `type`, e.g.
//! `{"type": "join-project", "projectId": "..."}`. Ids arrive as strings and
//! are validated by the gateway so malformed ids surface as validation errors
//! rather than parse failures.

use crate::chat::models::{MessageMetadata, MessageType};
use crate::presence::PresenceStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// First-message handshake for sessions upgraded without a credential
    Auth {
        token: String,
    },
    JoinProject {
        project_id: String,
    },
    LeaveProject {
        project_id: String,
    },
    ChatMessage {
        project_id: String,
        message: String,
        #[serde(default, rename = "messageType")]
        message_type: Option<MessageType>,
        #[serde(default)]
        metadata: Option<MessageMetadata>,
    },
    TypingStart {
        project_id: String,
    },
    TypingStop {
        project_id: String,
    },
    PresenceUpdate {
        project_id: String,
        status: PresenceStatus,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Auth { .. } => "auth",
            ClientEvent::JoinProject { .. } => "join-project",
            ClientEvent::LeaveProject { .. } => "leave-project",
            ClientEvent::ChatMessage { .. } => "chat-message",
            ClientEvent::TypingStart { .. } => "typing-start",
            ClientEvent::TypingStop { .. } => "typing-stop",
            ClientEvent::PresenceUpdate { .. } => "presence-update",
        }
    }
}
