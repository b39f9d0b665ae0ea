//! Relay Daemon - Fragment Delivery over Server-Sent Events
//!
//! Runs the partitioned worker pool, the stream registry and the HTTP
//! surface that browsers subscribe to.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8080, 4 partitions)
//! relay-daemon
//!
//! # Custom listen address and partition count
//! relay-daemon --listen-addr 127.0.0.1:9000 --partitions 8
//!
//! # With config file
//! relay-daemon --config /etc/finance-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod pipeline;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_core::{load_config, load_config_from_path, ConfigOverrides, RelayConfig};

use pipeline::Pipeline;
use server::AppState;

/// Relay Daemon - streams conversation fragments to browsers
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address the HTTP server binds to
    #[arg(long, value_name = "ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Number of log partitions (one worker each)
    #[arg(short = 'p', long)]
    partitions: Option<usize>,

    /// Per-partition queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Per-connection inbox capacity
    #[arg(long)]
    inbox_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(addr) = self.listen_addr {
            overrides = overrides.with_listen_addr(addr);
        }
        if let Some(partitions) = self.partitions {
            overrides = overrides.with_partitions(partitions);
        }
        if let Some(capacity) = self.queue_capacity {
            overrides = overrides.with_queue_capacity(capacity);
        }
        if let Some(capacity) = self.inbox_capacity {
            overrides = overrides.with_inbox_capacity(capacity);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "relay_daemon={level},relay_core={level},tower_http=warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load config: {path:?}"))?,
        None => load_config().context("Failed to load config")?,
    };
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Cancel `shutdown` on SIGTERM or SIGINT
fn install_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
            () = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}

async fn run(config: RelayConfig) -> Result<()> {
    let pipeline = Pipeline::start(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone())?;

    let state = AppState::new(
        pipeline.registry.clone(),
        Arc::clone(&pipeline.pool),
        pipeline.producer.clone(),
        shutdown.clone(),
    );
    let served = server::serve(listener, server::router(state), shutdown.clone()).await;

    // A server error still stops the pipeline before reporting.
    shutdown.cancel();
    info!("Shutting down...");
    pipeline.shutdown().await?;
    served.context("HTTP server failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        listen_addr = %config.listen_addr,
        partitions = config.partitions,
        source = ?config.source(),
        "Configuration loaded"
    );
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    match run(config).await {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay daemon stopped with error");
            Err(e)
        }
    }
}
