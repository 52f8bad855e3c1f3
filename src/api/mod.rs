//! HTTP and WebSocket API for the chat service

pub mod chat_handlers;
pub mod handlers;
pub mod query;
pub mod routes;
pub mod ws_handlers;

pub use query::*;
pub use routes::create_router;
