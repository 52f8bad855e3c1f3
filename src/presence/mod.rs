//! Presence & typing tracker

mod tracker;

pub use tracker::{PresenceEntry, PresenceStatus, PresenceTracker};
