//! Connection manager service binary

use anyhow::{Context, Result};
use cd11_config::ConnManConfig;
use clap::Parser;
use connman::{ConnectionBroker, DnsResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "connman")]
#[command(about = "CD1.1 connection manager", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/connman.toml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting connection manager");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ConnManConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let broker = Arc::new(
        ConnectionBroker::initialize(config, &DnsResolver)
            .await
            .context("Connection broker startup failed")?,
    );
    let listener = broker.bind().await.context("Could not open well-known port")?;

    let signal_broker = Arc::clone(&broker);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_broker.shutdown();
    });

    broker.serve(listener).await?;
    info!("Connection manager stopped");
    Ok(())
}
