//! Classroom Chat - Main Server
//!
//! Real-time project chat for classrooms: rooms, threads, moderation and
//! AI conversation context over HTTP and WebSocket.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use classroom_chat::{auth::jwt::encode_jwt, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "classroom-chat")]
#[command(about = "Classroom chat server")]
struct Cli {
    /// Path to the YAML config file (defaults to ./config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Issue a signed access token for local testing
    Token {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        email: String,

        /// student, instructor or admin
        #[arg(long, default_value = "student")]
        role: String,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        expiry: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,classroom_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            classroom_chat::start_server(config).await
        }
        Commands::Token {
            user_id,
            name,
            email,
            role,
            expiry,
        } => {
            let Some(auth) = config.auth_config else {
                bail!("No JWT secret configured (set JWT_SECRET or auth.jwt_secret)");
            };
            let token = encode_jwt(&user_id, &email, &name, &role, &auth.jwt_secret, expiry)?;
            println!("{}", token);
            Ok(())
        }
    }
}
