//! Relay Server
//!
//! Run with: cargo run -- --config relay.toml
//!
//! Configuration is read from the file given with `--config`, otherwise from
//! the default locations, with `RELAY_*` environment variables applied on
//! top. `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use clap::Parser;
use relay::api::{serve, shutdown_signal, AppState};
use relay::config::{generate_default_config, Config, LoggingConfig};
use relay::hub::Hub;
use relay::ingest::{HttpPollSource, IngestScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan-out relay for real-time upstream updates")]
#[command(long_about = "Relay pulls updates from upstream services and pushes each one to every connected WebSocket and SSE client.")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    pub print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    // Logging settings live in the config, so file problems are reported
    // once the subscriber is installed
    let (config, loaded) = match &cli.config {
        Some(path) => {
            let config = Config::load_with_env(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            (config, None)
        }
        None => {
            let loaded = Config::load_default();
            (loaded.config.clone(), Some(loaded))
        }
    };

    init_tracing(&config.logging);

    tracing::info!("Starting relay v{}", env!("CARGO_PKG_VERSION"));
    match (&loaded, &cli.config) {
        (Some(loaded), _) => loaded.log(),
        (None, Some(path)) => tracing::info!("Loaded config from {:?}", path),
        (None, None) => {}
    }
    tracing::info!(
        queue_capacity = config.hub.queue_capacity,
        max_subscribers = config.hub.max_subscribers,
        "Hub configured"
    );

    let hub = Hub::new(config.hub.clone());

    // Start upstream ingestors
    let scheduler =
        IngestScheduler::from_config(&config).context("Failed to build ingestors")?;
    if scheduler.is_empty() {
        tracing::warn!("No ingestors enabled, relaying published payloads only");
    }
    let ingest = scheduler.start(hub.clone());

    let mut state = AppState::new(hub.clone(), config.clone());
    if config.poll.enabled && config.poll.snapshot_on_connect {
        let source = HttpPollSource::new(&config.poll.url, config.poll.timeout())
            .context("Failed to build snapshot client")?;
        state = state.with_snapshot(Arc::new(source));
    }

    // Run server
    let served = serve(state, &config.server, shutdown_signal()).await;

    // Graceful shutdown
    ingest.shutdown(config.server.shutdown_grace()).await;
    let closed = hub.shutdown();
    tracing::info!(closed, "Relay stopped");

    served.context("Server failed")
}

/// Initialize the global tracing subscriber
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relay={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
