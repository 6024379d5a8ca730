//! Foresight Gateway Binary
//!
//! Runs the suggestion engine behind the SSE/WebSocket push gateway.
//!
//! # Usage
//! ```bash
//! foresight-gateway [--port 18789] [--host 127.0.0.1] [--database foresight.db] \
//!     [--engine-config engine.toml] [--config gateway.toml] [--verbose]
//! ```

use anyhow::Context;
use clap::Parser;
use foresight_core::storage::{SqliteCorpus, SqliteSuggestionStore};
use foresight_core::{EngineConfig, LiveDispatcher};
use foresight_engine::{Collaborators, OpenAICompatibleClient, SuggestionPipeline};
use foresight_gateway::{spawn_heartbeat, BroadcastHub, Gateway, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Foresight Gateway - proactive suggestions pushed over SSE and WebSocket
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the gateway config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides the gateway config)
    #[arg(long)]
    host: Option<String>,

    /// SQLite database with the fact corpus and stored suggestions
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Gateway configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long)]
    engine_config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading gateway config {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(database) = args.database {
        config = config.with_database_path(database);
    }
    if let Some(path) = args.engine_config {
        config = config.with_engine_config_path(path);
    }
    config.validate()?;

    let engine_config = match &config.engine_config_path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => {
            let mut engine_config = EngineConfig::default();
            engine_config.apply_env();
            engine_config.validate()?;
            engine_config
        }
    };

    let store = Arc::new(
        SqliteSuggestionStore::open(&config.database_path)
            .and_then(|store| store.with_write_timeout(engine_config.timeouts.store()))
            .context("opening suggestion store")?,
    );
    let corpus = Arc::new(SqliteCorpus::open(&config.database_path).context("opening corpus")?);
    let generation = Arc::new(OpenAICompatibleClient::from_env());
    let hub = Arc::new(BroadcastHub::new(config.event_buffer));

    let collaborators = Collaborators {
        corpus: corpus.clone(),
        search: corpus,
        generation,
        store: store.clone(),
        dispatcher: hub.clone(),
        budget: Collaborators::budget_from(&engine_config),
    };
    let pipeline = Arc::new(SuggestionPipeline::new(collaborators, engine_config));
    pipeline.start()?;

    let heartbeat = spawn_heartbeat(hub.clone(), config.heartbeat_interval());

    tracing::info!(
        version = foresight_gateway::VERSION,
        database = %config.database_path.display(),
        "Starting Foresight gateway on http://{}:{}",
        config.host,
        config.port
    );

    let gateway = Gateway::new(config, pipeline.clone(), hub.clone(), store);
    // Closing the hub ends open SSE streams so graceful shutdown can finish.
    let shutdown_hub = hub.clone();
    gateway
        .serve(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            shutdown_hub.close();
        })
        .await?;

    if let Err(e) = pipeline.stop() {
        tracing::debug!(error = %e, "Pipeline already stopped");
    }
    hub.close();
    heartbeat.abort();

    Ok(())
}
