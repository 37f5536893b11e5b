//! Relay gateway — the reference front door for the run orchestrator:
//! a WebSocket channel endpoint plus file and run inspection routes.

mod api;
mod state;

use clap::Parser;
use std::path::PathBuf;

use relay_domain::config::{Config, Settings};

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Streaming run orchestrator for chat assistants")]
struct Args {
    /// Optional TOML config (pricing tables, agent presets).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override (defaults to RELAY_LISTEN).
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let listen = args.listen.clone().unwrap_or_else(|| settings.listen_addr.clone());
    let state = AppState::build(settings, config)?;

    if state.env.providers.is_empty() {
        tracing::warn!("no LLM providers registered; runs will be rejected until credentials are set");
    }

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "relay gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}
