//! Keystone Daemon - NATS trust chain controller
//!
//! The daemon provides:
//! - REST API for declaring roots, namespaces and principals
//! - Reconciliation workers that keep keys and credentials converged
//! - Account credential resolver on the message bus
//! - Event streaming for observability

use clap::Parser;
use keystone_daemon::{DaemonConfig, DaemonError, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keystone Daemon CLI
#[derive(Parser)]
#[command(name = "keystoned")]
#[command(about = "Keystone Daemon - NATS trust chain controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KEYSTONE_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "KEYSTONE_LISTEN_ADDR")]
    listen: Option<String>,

    /// NATS server URL; without it the resolver only serves in-process
    #[arg(long, env = "KEYSTONE_BUS_URL")]
    bus_url: Option<String>,

    /// Credentials file for the resolver's NATS connection
    #[arg(long, env = "KEYSTONE_BUS_CREDS")]
    bus_creds: Option<std::path::PathBuf>,

    /// Number of reconciliation workers
    #[arg(long, env = "KEYSTONE_WORKERS")]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "KEYSTONE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "KEYSTONE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(url) = cli.bus_url {
        config.bus.url = Some(url);
    }
    if let Some(creds) = cli.bus_creds {
        config.bus.creds_file = Some(creds);
    }
    if let Some(workers) = cli.workers {
        config.reconciler.workers = workers;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        bus = config.bus.url.as_deref().unwrap_or("in-process"),
        workers = config.reconciler.workers,
        "Starting keystoned"
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
