//! Per-project typing sets and presence maps
//!
//! Process-local, never persisted. Presence is last-write-wins by the order
//! in which updates are processed, not by any client-side timestamp.

use crate::events::{EventEmitter, ServerEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("Unknown presence status: {}", other)),
        }
    }
}

/// Last known presence of one user in one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

pub struct PresenceTracker {
    typing: DashMap<Uuid, HashSet<String>>,
    presence: DashMap<Uuid, HashMap<String, PresenceEntry>>,
    emitter: Arc<dyn EventEmitter>,
}

impl PresenceTracker {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            typing: DashMap::new(),
            presence: DashMap::new(),
            emitter,
        }
    }

    pub fn handle_typing_start(&self, project_id: Uuid, user_id: &str, display_name: &str) {
        self.typing
            .entry(project_id)
            .or_default()
            .insert(user_id.to_string());

        debug!(project_id = %project_id, user_id, "Typing started");
        self.emitter.emit_to_project(
            project_id,
            ServerEvent::UserTyping {
                project_id,
                user_id: user_id.to_string(),
                user_name: display_name.to_string(),
            },
        );
    }

    pub fn handle_typing_stop(&self, project_id: Uuid, user_id: &str, display_name: &str) {
        // Drop the project's set once nobody is typing
        self.typing.remove_if_mut(&project_id, |_, users| {
            users.remove(user_id);
            users.is_empty()
        });

        debug!(project_id = %project_id, user_id, "Typing stopped");
        self.emitter.emit_to_project(
            project_id,
            ServerEvent::UserStoppedTyping {
                project_id,
                user_id: user_id.to_string(),
                user_name: display_name.to_string(),
            },
        );
    }

    pub fn handle_presence_update(
        &self,
        project_id: Uuid,
        user_id: &str,
        display_name: &str,
        status: PresenceStatus,
    ) {
        let timestamp = Utc::now();
        self.presence.entry(project_id).or_default().insert(
            user_id.to_string(),
            PresenceEntry {
                status,
                user_name: display_name.to_string(),
                timestamp,
            },
        );

        debug!(project_id = %project_id, user_id, status = %status, "Presence updated");
        self.emitter.emit_to_project(
            project_id,
            ServerEvent::UserPresence {
                project_id,
                user_id: user_id.to_string(),
                user_name: display_name.to_string(),
                status,
                timestamp: timestamp.to_rfc3339(),
            },
        );
    }

    /// Snapshot of users currently typing in a project
    pub fn typing_users(&self, project_id: Uuid) -> HashSet<String> {
        self.typing
            .get(&project_id)
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Snapshot of every known user's presence in a project
    pub fn user_presence(&self, project_id: Uuid) -> HashMap<String, PresenceEntry> {
        self.presence
            .get(&project_id)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}
