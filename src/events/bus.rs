//! Event bus for broadcasting room events to gateway sessions

use super::{EventEmitter, RoomEvent, ServerEvent, Target};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes RoomEvents via `tokio::sync::broadcast`
///
/// Every session subscribes once and keeps the events whose target it
/// belongs to. Emitting never blocks; with no subscribers events are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events (one receiver per session)
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, target: Target, event: ServerEvent) {
        let name = event.name();
        match self.sender.send(RoomEvent { target, event }) {
            Ok(n) => {
                debug!(event = name, subscribers = n, "Room event emitted");
            }
            Err(_) => {
                // No subscribers
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
