//! Sentinel Tunnel CLI
//!
//! Exposes Redis services on local ports and forwards every connection to the
//! service's current master, as reported by Redis Sentinel.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sentinel_tunnel_lib::{SentinelResolver, TunnelConfig, TunnelManager};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sentinel Tunnel - local ports for Sentinel-managed Redis masters
#[derive(Parser, Debug)]
#[command(name = "sentinel-tunnel")]
#[command(about = "Sentinel Tunnel - Local ports for Sentinel-managed Redis masters")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Append logs to this file instead of printing them
    #[arg(value_name = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log filter (e.g. "info", "debug", "sentinel_tunnel_server=trace")
    #[arg(long, default_value = "info", env = "SENTINEL_TUNNEL_LOG")]
    log_level: String,
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Setup logging with the specified filter, to a file when one is given
fn setup_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_layer, file_layer) = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (Some(fmt::layer().with_target(true).with_thread_ids(false)), None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

/// Log a startup error before handing it back to main
fn fatal(e: anyhow::Error) -> anyhow::Error {
    error!("{:#}", e);
    e
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.log_file.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIME"),
        "Sentinel tunnel starting"
    );

    let config = TunnelConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config file {}", cli.config.display()))
        .map_err(fatal)?;

    info!(
        sentinels = ?config.sentinels_addresses_list,
        databases = config.databases.len(),
        listen_host = %config.listen_host,
        "Loaded configuration"
    );

    let resolver = SentinelResolver::connect(
        config.sentinels_addresses_list.clone(),
        config.sentinel_timeout(),
    )
    .await
    .context("Failed to connect to Sentinel")
    .map_err(fatal)?;

    let mut tunnels = TunnelManager::new(&config, Arc::new(resolver))
        .start()
        .await
        .context("Failed to start listeners")
        .map_err(fatal)?;

    for (service, addr) in tunnels.local_addrs() {
        info!("Database {} available on {}", service, addr);
    }

    let result = tokio::select! {
        signal = shutdown_signal() => {
            info!("Shutting down...");
            signal
        }
        waited = tunnels.wait() => match waited {
            Ok(()) => Err(fatal(anyhow!("All listeners have stopped"))),
            Err(e) => Err(fatal(anyhow::Error::new(e).context("Listener failed"))),
        },
    };

    tunnels.shutdown().await;
    info!("Sentinel tunnel stopped");

    result
}
