//! Test helper factories and in-memory collaborator fakes

use crate::auth::jwt::encode_jwt;
use crate::auth::{Identity, Role};
use crate::chat::generation::{GenerationOptions, TextGenerator};
use crate::chat::models::Sender;
use crate::chat::moderation::{ModerationGate, ModerationVerdict, Severity};
use crate::chat::MessageService;
use crate::events::EventBus;
use crate::presence::PresenceTracker;
use crate::store::InMemoryChatStore;
use crate::{AuthConfig, Config};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

// ============================================================================
// Identities
// ============================================================================

/// Student sender whose display name equals its id
pub fn student(id: &str) -> Sender {
    Sender::Student {
        id: id.to_string(),
        name: id.to_string(),
    }
}

pub fn instructor_identity() -> Identity {
    Identity {
        user_id: "instr-1".to_string(),
        email: "grace@school.edu".to_string(),
        name: "Grace".to_string(),
        role: Role::Instructor,
        permissions: Vec::new(),
    }
}

pub fn test_token(user_id: &str, name: &str, role: &str) -> String {
    encode_jwt(
        user_id,
        &format!("{}@school.edu", user_id),
        name,
        role,
        TEST_SECRET,
        3600,
    )
    .expect("token encodes")
}

// ============================================================================
// Collaborator fakes
// ============================================================================

#[derive(Default)]
struct ModerationScript {
    severity: Severity,
    failing: bool,
    calls: usize,
    last_content: Option<String>,
}

/// Moderation gate returning a configurable verdict
#[derive(Clone, Default)]
pub struct ScriptedModeration {
    script: Arc<Mutex<ModerationScript>>,
}

impl ScriptedModeration {
    pub fn set_severity(&self, severity: Severity) {
        self.script.lock().unwrap().severity = severity;
    }

    pub fn set_failing(&self, failing: bool) {
        self.script.lock().unwrap().failing = failing;
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls
    }

    pub fn last_content(&self) -> Option<String> {
        self.script.lock().unwrap().last_content.clone()
    }
}

#[async_trait]
impl ModerationGate for ScriptedModeration {
    async fn analyze(&self, content: &str) -> Result<ModerationVerdict> {
        let mut script = self.script.lock().unwrap();
        script.calls += 1;
        script.last_content = Some(content.to_string());
        if script.failing {
            return Err(anyhow!("moderation service down"));
        }
        Ok(ModerationVerdict {
            is_inappropriate: script.severity != Severity::Low,
            severity: script.severity,
            categories: if script.severity == Severity::Low {
                Vec::new()
            } else {
                vec!["harassment".to_string()]
            },
        })
    }
}

#[derive(Default)]
struct GeneratorLog {
    calls: usize,
    last_prompt: Option<String>,
    last_options: Option<GenerationOptions>,
}

/// Text generator that records its prompts and answers with a fixed reply
#[derive(Clone)]
pub struct CountingGenerator {
    reply: Option<String>,
    log: Arc<Mutex<GeneratorLog>>,
}

impl CountingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            log: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            log: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().calls
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.log.lock().unwrap().last_prompt.clone()
    }

    pub fn last_options(&self) -> Option<GenerationOptions> {
        self.log.lock().unwrap().last_options
    }
}

#[async_trait]
impl TextGenerator for CountingGenerator {
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<String> {
        {
            let mut log = self.log.lock().unwrap();
            log.calls += 1;
            log.last_prompt = Some(prompt.to_string());
            log.last_options = Some(options);
        }
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("generation backend unavailable"))
    }
}

// ============================================================================
// Service builders
// ============================================================================

pub struct TestService {
    pub service: Arc<MessageService>,
    pub store: Arc<InMemoryChatStore>,
    pub bus: EventBus,
    pub moderation: ScriptedModeration,
    pub presence: Arc<PresenceTracker>,
}

pub fn test_service() -> TestService {
    test_service_with(ScriptedModeration::default())
}

pub fn test_service_with(moderation: ScriptedModeration) -> TestService {
    let store = Arc::new(InMemoryChatStore::new());
    let bus = EventBus::default();
    let service = Arc::new(MessageService::new(
        store.clone(),
        Arc::new(moderation.clone()),
        Arc::new(bus.clone()),
    ));
    let presence = Arc::new(PresenceTracker::new(Arc::new(bus.clone())));
    TestService {
        service,
        store,
        bus,
        moderation,
        presence,
    }
}

/// Anonymous-mode config without external collaborators
pub fn test_config() -> Config {
    Config {
        server_port: 0,
        auth_config: None,
        rate_limit_max_events: 100,
        rate_limit_window_secs: 60,
        default_context_window: 10,
        summary_cache_capacity: 100,
        summary_max_tokens: 200,
        summary_temperature: 0.3,
        moderation_url: None,
        moderation_timeout_secs: 10,
        generation_url: None,
        generation_model: "test-model".to_string(),
        generation_api_key: None,
        generation_timeout_secs: 5,
        personas: Vec::new(),
    }
}

pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        allowed_email_domain: None,
    }
}
