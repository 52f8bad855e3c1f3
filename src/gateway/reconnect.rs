//! Client-side reconnection state machine
//!
//! `Disconnected → Connecting → Connected`, and on loss
//! `Connected → Reconnecting{1} → ... → Reconnecting{max}` with exponential,
//! capped delays. Running out of attempts lands back in `Disconnected`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// What the caller should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    /// Open a transport now
    Connect,
    /// Open a transport after the delay
    RetryAfter { attempt: u32, delay: Duration },
    /// Retries exhausted
    GaveUp,
    /// Transition did not apply in the current state
    Ignored,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// `base * 2^(attempt - 1)`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// User-initiated connect
    pub fn connect(&mut self) -> ReconnectStep {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                ReconnectStep::Connect
            }
            _ => ReconnectStep::Ignored,
        }
    }

    pub fn on_connected(&mut self) -> ReconnectStep {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {
                self.state = ConnectionState::Connected;
                ReconnectStep::Settled
            }
            _ => ReconnectStep::Ignored,
        }
    }

    /// Transport dropped or a connect attempt failed
    pub fn on_connection_lost(&mut self) -> ReconnectStep {
        let attempt = match self.state {
            ConnectionState::Disconnected => return ReconnectStep::Ignored,
            ConnectionState::Connecting | ConnectionState::Connected => 1,
            ConnectionState::Reconnecting { attempt } => attempt + 1,
        };

        if attempt > self.policy.max_attempts {
            self.state = ConnectionState::Disconnected;
            return ReconnectStep::GaveUp;
        }
        self.state = ConnectionState::Reconnecting { attempt };
        ReconnectStep::RetryAfter {
            attempt,
            delay: self.policy.delay_for(attempt),
        }
    }

    /// User-initiated close; no retries follow
    pub fn disconnect(&mut self) -> ReconnectStep {
        self.state = ConnectionState::Disconnected;
        ReconnectStep::Settled
    }
}
