//! Classroom Chat
//!
//! Real-time messaging core for project-based classrooms:
//! - WebSocket gateway with bearer auth, rooms and per-session rate limiting
//! - Threaded project conversations with moderation gating
//! - Presence and typing indicators
//! - Bounded, summarized conversation context for AI responders

pub mod api;
pub mod auth;
pub mod chat;
pub mod events;
pub mod gateway;
pub mod presence;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub chat: ChatYamlConfig,
    pub moderation: ModerationYamlConfig,
    pub generation: GenerationYamlConfig,
    /// Auth section; if absent, sessions run in anonymous mode
    pub auth: Option<AuthConfig>,
    /// AI personas seeded into the store at startup
    pub personas: Vec<chat::PersonaProfile>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Chat behaviour section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatYamlConfig {
    pub rate_limit_max_events: u32,
    pub rate_limit_window_secs: u64,
    /// Recent messages passed verbatim when a persona has no own setting
    pub default_context_window: usize,
    pub summary_cache_capacity: u64,
    pub summary_max_tokens: u32,
    pub summary_temperature: f32,
}

impl Default for ChatYamlConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_events: 100,
            rate_limit_window_secs: 60,
            default_context_window: 10,
            summary_cache_capacity: 1000,
            summary_max_tokens: 200,
            summary_temperature: 0.3,
        }
    }
}

/// Moderation collaborator section. No url means every message is admitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationYamlConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModerationYamlConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
        }
    }
}

/// Text-generation collaborator section. No url disables summaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationYamlConfig {
    pub url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationYamlConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: "gpt-4o-mini".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Bearer-token verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret (HS256, minimum 32 characters)
    pub jwt_secret: String,
    /// Optional domain restriction (e.g. "school.edu")
    pub allowed_email_domain: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// None means anonymous mode
    pub auth_config: Option<AuthConfig>,
    pub rate_limit_max_events: u32,
    pub rate_limit_window_secs: u64,
    pub default_context_window: usize,
    pub summary_cache_capacity: u64,
    pub summary_max_tokens: u32,
    pub summary_temperature: f32,
    pub moderation_url: Option<String>,
    pub moderation_timeout_secs: u64,
    pub generation_url: Option<String>,
    pub generation_model: String,
    pub generation_api_key: Option<String>,
    pub generation_timeout_secs: u64,
    pub personas: Vec<chat::PersonaProfile>,
}

impl Config {
    /// Equivalent to `from_yaml_and_env(None)`
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        // JWT_SECRET alone is enough to switch auth on
        let auth_config = match (std::env::var("JWT_SECRET").ok(), yaml.auth) {
            (Some(secret), Some(mut auth)) => {
                auth.jwt_secret = secret;
                Some(auth)
            }
            (Some(secret), None) => Some(AuthConfig {
                jwt_secret: secret,
                allowed_email_domain: None,
            }),
            (None, auth) => auth,
        };

        Ok(Self {
            server_port: env_parse("SERVER_PORT").unwrap_or(yaml.server.port),
            auth_config,
            rate_limit_max_events: env_parse("CHAT_RATE_LIMIT_MAX_EVENTS")
                .unwrap_or(yaml.chat.rate_limit_max_events),
            rate_limit_window_secs: env_parse("CHAT_RATE_LIMIT_WINDOW_SECS")
                .unwrap_or(yaml.chat.rate_limit_window_secs),
            default_context_window: env_parse("CHAT_DEFAULT_CONTEXT_WINDOW")
                .unwrap_or(yaml.chat.default_context_window),
            summary_cache_capacity: yaml.chat.summary_cache_capacity,
            summary_max_tokens: yaml.chat.summary_max_tokens,
            summary_temperature: yaml.chat.summary_temperature,
            moderation_url: std::env::var("MODERATION_URL").ok().or(yaml.moderation.url),
            moderation_timeout_secs: yaml.moderation.timeout_secs,
            generation_url: std::env::var("GENERATION_URL").ok().or(yaml.generation.url),
            generation_model: std::env::var("GENERATION_MODEL").unwrap_or(yaml.generation.model),
            generation_api_key: std::env::var("GENERATION_API_KEY")
                .ok()
                .or(yaml.generation.api_key),
            generation_timeout_secs: yaml.generation.timeout_secs,
            personas: yaml.personas,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    pub fn gateway_config(&self) -> gateway::GatewayConfig {
        gateway::GatewayConfig {
            rate_limit_max_events: self.rate_limit_max_events,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn generation_options(&self) -> chat::GenerationOptions {
        chat::GenerationOptions {
            max_tokens: self.summary_max_tokens,
            temperature: self.summary_temperature,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Application state
// ============================================================================

/// Shared application state: every service, explicitly wired
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn store::ChatStore>,
    pub bus: events::EventBus,
    pub messages: Arc<chat::MessageService>,
    pub presence: Arc<presence::PresenceTracker>,
    pub context: Arc<chat::ContextAssembler>,
    pub gateway: gateway::Gateway,
    pub verifier: Arc<dyn auth::TokenVerifier>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire services over an in-memory store and the configured collaborators
    pub fn new(config: Config) -> Result<Self> {
        let moderation: Arc<dyn chat::ModerationGate> = match config.moderation_url {
            Some(ref url) => Arc::new(
                chat::HttpModerationGate::new(
                    url.clone(),
                    Duration::from_secs(config.moderation_timeout_secs),
                )
                .context("Failed to create moderation gate")?,
            ),
            None => {
                tracing::warn!("No moderation service configured, admitting all messages");
                Arc::new(chat::PermissiveModerationGate)
            }
        };

        let generator: Option<Arc<dyn chat::TextGenerator>> = match config.generation_url {
            Some(ref url) => Some(Arc::new(
                chat::HttpTextGenerator::new(
                    url.clone(),
                    config.generation_model.clone(),
                    config.generation_api_key.clone(),
                    Duration::from_secs(config.generation_timeout_secs),
                )
                .context("Failed to create text generator")?,
            )),
            None => None,
        };

        let verifier: Arc<dyn auth::TokenVerifier> = match config.auth_config {
            Some(ref auth) => Arc::new(auth::JwtVerifier::new(
                auth.jwt_secret.clone(),
                auth.allowed_email_domain.clone(),
            )),
            None => {
                tracing::warn!("No auth section configured, running in anonymous mode");
                Arc::new(auth::AnonymousVerifier)
            }
        };

        let store = Arc::new(store::InMemoryChatStore::with_personas(
            config.personas.iter().cloned(),
        ));
        tracing::info!(personas = config.personas.len(), "Seeded persona profiles");

        Ok(Self::with_collaborators(
            config,
            store,
            moderation,
            generator,
            verifier,
        ))
    }

    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn store::ChatStore>,
        moderation: Arc<dyn chat::ModerationGate>,
        generator: Option<Arc<dyn chat::TextGenerator>>,
        verifier: Arc<dyn auth::TokenVerifier>,
    ) -> Self {
        let bus = events::EventBus::default();
        let emitter: Arc<dyn events::EventEmitter> = Arc::new(bus.clone());

        let messages = Arc::new(chat::MessageService::new(
            store.clone(),
            moderation,
            emitter.clone(),
        ));
        let presence = Arc::new(presence::PresenceTracker::new(emitter));
        let context = Arc::new(chat::ContextAssembler::new(
            store.clone(),
            generator,
            config.summary_cache_capacity,
            config.default_context_window,
            config.generation_options(),
        ));
        let gateway = gateway::Gateway::new(
            verifier.clone(),
            messages.clone(),
            presence.clone(),
            config.gateway_config(),
        );

        Self {
            store,
            bus,
            messages,
            presence,
            context,
            gateway,
            verifier,
            config: Arc::new(config),
        }
    }
}

/// Bind the HTTP/WebSocket server and serve until shutdown
pub async fn start_server(config: Config) -> Result<()> {
    let port = config.server_port;
    let state = AppState::new(config)?;
    let app = api::create_router(Arc::new(state));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Classroom chat listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ============================================================================
// Tests
// ============================================================================
