// ABOUTME: Main entry point for the chat completion relay
// ABOUTME: Initializes logging, config, metrics, and serves the HTTP surface

use anyhow::Result;
use chatrelay::{config::Config, metrics, server};
use chatrelay_plugin::InMemoryFunctionStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chat completion relay
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Config file (overrides CHATRELAY_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,chatrelay=debug,chatrelay_core=debug".into());
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting chat relay");

    let config = match args.config {
        Some(path) => Config::load_from(Some(&path))?,
        None => Config::load()?,
    };

    tracing::info!(
        remote = %config.relay.remote.url,
        transport = %config.relay.transport.mode,
        models = config.models.len(),
        bypass_access_control = config.relay.bypass_model_access_control,
        "Configuration loaded"
    );

    let metrics_handle = metrics::init_metrics()?;

    // Functions are registered by embedders; the stock binary serves none
    let functions = Arc::new(InMemoryFunctionStore::new());
    let state = server::AppState::new(&config, functions, Some(metrics_handle))?;

    server::serve(&config, state).await
}
