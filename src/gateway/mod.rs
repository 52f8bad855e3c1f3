//! Connection gateway: sessions, inbound protocol, rate limiting and the
//! client reconnection state machine.

mod dispatcher;
mod protocol;
mod rate_limit;
mod reconnect;
mod session;

pub use dispatcher::{Gateway, GatewayConfig};
pub use protocol::ClientEvent;
pub use rate_limit::RateLimiter;
pub use reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy, ReconnectStep};
pub use session::Session;
