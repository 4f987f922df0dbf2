//! Jukebox server - Main entry point
//!
//! Loads configuration, wires the managers and serves the HTTP/WebSocket
//! API until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::config::JukeboxConfig;
use jukebox_server::{api, SharedState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for jukebox-server
#[derive(Parser, Debug)]
#[command(name = "jukebox-server")]
#[command(about = "Home jukebox playback and device-connection server")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overrides the configuration file
    #[arg(short, long, env = "JUKEBOX_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = JukeboxConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize tracing
    let default_filter = format!(
        "jukebox_server={level},jukebox_common={level},tower_http=info",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting jukebox-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("Invalid server bind address")?;
    let heartbeat = config.broadcast.heartbeat_interval();

    let state = SharedState::from_config(config).context("Failed to initialize jukebox")?;
    info!(
        "{} known devices, heartbeat every {:?}",
        state.connections.registry().known_devices().len(),
        heartbeat
    );

    let heartbeat_task = state.broadcaster.spawn_heartbeat(heartbeat);

    // Device connection blocks for up to the connect timeout; keep it off
    // the startup path
    let startup = state.clone();
    tokio::spawn(async move { startup.connect_default_device().await });

    api::run(state.clone(), addr, shutdown_signal())
        .await
        .context("Server error")?;

    heartbeat_task.abort();
    state.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
