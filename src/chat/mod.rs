//! Chat: project conversations, threads, moderation and AI context
//!
//! [`MessageService`] owns every message mutation; [`ContextAssembler`]
//! reads persisted history independently for AI responders.

pub mod context;
pub mod error;
pub mod generation;
pub mod models;
pub mod moderation;
pub mod service;

pub use context::{ContextAssembler, ContextEntry};
pub use error::{parse_id, ChatError, ChatResult};
pub use generation::{GenerationOptions, HttpTextGenerator, TextGenerator};
pub use models::{
    ChatMessage, ChatStatistics, Conversation, MessageDraft, MessageMetadata, MessageType,
    ModerationStatus, PersonaProfile, Sender,
};
pub use moderation::{
    FlagRecord, HttpModerationGate, ModerationGate, ModerationVerdict, PermissiveModerationGate,
    Severity, UserTimeout,
};
pub use service::MessageService;
