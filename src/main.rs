//! # Publisher Main Entry Point
//!
//! `serve` runs the API with the background loops; the other subcommands are one-shot
//! operator tools that share the same configuration.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use publisher::{
    auth::issue_owner_token,
    config::{AppConfig, ConfigLoader},
    db::{init_pool, run_migrations},
    server::{AppState, run_server},
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "publisher", version, about = "Article publishing and remediation verification")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API with the publisher and verification loops (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Run a single publisher pass and print the summary
    PublishOnce,
    /// Run a single verification pass and print the summary
    VerifyOnce {
        /// Check every completed item regardless of its next check time
        #[arg(long)]
        force: bool,
    },
    /// Print an owner token for the given owner id
    IssueOwnerToken { owner_id: Uuid },
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let db = init_pool(&config).await?;
    run_migrations(&db).await?;
    AppState::from_config(config, db)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config)?;

    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Loaded configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = build_state(config).await?;
            run_server(state).await?;
        }
        Command::Migrate => {
            let db = init_pool(&config).await?;
            run_migrations(&db).await?;
        }
        Command::PublishOnce => {
            let state = build_state(config).await?;
            let summary = state.publisher.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::VerifyOnce { force } => {
            let state = build_state(config).await?;
            let summary = state.verification.run_once(force).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::IssueOwnerToken { owner_id } => {
            let secret = config
                .owner_token_secret
                .as_deref()
                .ok_or_else(|| anyhow!("POBLYSH_OWNER_TOKEN_SECRET is not set"))?;
            let token = issue_owner_token(secret, owner_id)
                .ok_or_else(|| anyhow!("Failed to sign owner token"))?;
            println!("{token}");
        }
    }

    Ok(())
}
