//! Persistence contract for conversations, messages and moderation records

pub mod memory;
pub mod traits;

pub use memory::InMemoryChatStore;
pub use traits::ChatStore;
