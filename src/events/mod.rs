//! Room-targeted event system for real-time WebSocket delivery
//!
//! This module provides:
//! - `ServerEvent`: typed events pushed to clients
//! - `Room` / `Target`: broadcast addressing (`user:{id}`, `role:{role}`, `project:{id}`)
//! - `EventBus`: broadcast channel fanning events out to gateway sessions

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{EventEmitter, Room, RoomEvent, ServerEvent, SessionUser, Target};
