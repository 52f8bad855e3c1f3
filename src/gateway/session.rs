//! Per-connection session state

use super::rate_limit::RateLimiter;
use crate::auth::Identity;
use crate::events::{Room, ServerEvent, Target};
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One transport session. Owned by its connection task; nothing else
/// mutates it, so no locking is needed.
pub struct Session {
    pub id: Uuid,
    identity: Option<Identity>,
    rooms: HashSet<Room>,
    pub(super) limiter: RateLimiter,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

impl Session {
    pub fn new(limiter: RateLimiter, outbox: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: None,
            rooms: HashSet::new(),
            limiter,
            outbox,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub(super) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn rooms(&self) -> &HashSet<Room> {
        &self.rooms
    }

    pub(super) fn join(&mut self, room: Room) -> bool {
        self.rooms.insert(room)
    }

    pub(super) fn leave(&mut self, room: &Room) -> bool {
        self.rooms.remove(room)
    }

    /// Project ids of every `project:*` room joined
    pub fn project_ids(&self) -> Vec<Uuid> {
        self.rooms.iter().filter_map(Room::project_id).collect()
    }

    /// Whether a broadcast with this target reaches the session
    pub fn receives(&self, target: &Target) -> bool {
        match target {
            Target::Everyone => true,
            Target::Room(room) => self.rooms.contains(room),
        }
    }

    /// Queue an event for this session only. Dropped if the transport is gone.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.outbox.send(event);
    }

    pub fn outbox(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.outbox.clone()
    }
}
