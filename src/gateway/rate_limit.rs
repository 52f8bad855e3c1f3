//! Per-session inbound event limiter
//!
//! The window opens at the first counted event and closes `window` later; the
//! next event after that opens a fresh window. There is no fixed clock tick.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_events: u32,
    window: Duration,
    window_start: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            window_start: None,
            count: 0,
        }
    }

    pub fn max_events(&self) -> u32 {
        self.max_events
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count an event now. `false` means the event must be rejected.
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.count = 0;
            }
        }

        if self.count >= self.max_events {
            return false;
        }
        self.count += 1;
        true
    }

    /// Events counted in the current window
    pub fn count(&self) -> u32 {
        self.count
    }
}
