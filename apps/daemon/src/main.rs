//! Wildguard Daemon - standalone headless wildlife surveillance and
//! pest-deterrence controller.
//!
//! Polls configured cameras on a fixed interval, detects pests in their
//! snapshots, and responds with a deterrent sound chosen from what has
//! worked best before. Runs with no UI; deployments that want one build on
//! top of the daemon's persistence store separately.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use wildguard_core::bootstrap_services;

use crate::config::DaemonConfig;

/// Wildguard Daemon - headless wildlife surveillance and pest-deterrence controller.
#[derive(Parser, Debug)]
#[command(name = "wildguard-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "WILDGUARD_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Directory for the persistence store and generated media.
    #[arg(short = 'd', long, env = "WILDGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Wildguard Daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let paths = config.to_data_paths();
    log::info!("Using data directory: {}", paths.data_dir.display());

    let services = bootstrap_services(&paths).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let worker_handle = {
        let worker = services.worker.clone();
        let shutdown = services.cancel_token.clone();
        tokio::spawn(async move {
            worker.run(shutdown).await;
        })
    };

    log::info!("Detection worker started");

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    let _ = worker_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
