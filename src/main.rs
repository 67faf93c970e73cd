//! tannoy - headless audio mixing and streaming engine
//!
//! Starts the engine against the configured output device, optionally seeds
//! the queue from the command line, and runs until Ctrl+C or SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tannoy::config::Config;
use tannoy::events::EngineEvent;
use tannoy::Engine;

/// Command-line arguments for tannoy
#[derive(Parser, Debug)]
#[command(name = "tannoy")]
#[command(about = "Headless audio mixing and streaming engine")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TANNOY_CONFIG")]
    config: Option<PathBuf>,

    /// List available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Queries (URLs or search text) to enqueue at startup
    queries: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tannoy={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in tannoy::audio::output::AudioOutput::list_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("Starting tannoy");
    let engine = Engine::start(config)
        .await
        .context("Failed to start engine")?;

    // Log engine activity; a real front end would subscribe the same way
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::TrackStarted { locator, title, .. } => {
                    info!(%locator, ?title, "track started");
                }
                EngineEvent::TrackFinished { outcome, .. } => {
                    info!(?outcome, "track finished");
                }
                EngineEvent::QueueChanged { len, .. } => {
                    info!(len, "queue changed");
                }
                _ => {}
            }
        }
    });

    for query in &args.queries {
        match engine.enqueue(query).await {
            Ok(request) => info!(
                locator = %request.locator,
                title = ?request.title,
                "seeded queue"
            ),
            Err(e) => warn!("could not enqueue '{}': {}", query, e),
        }
    }

    shutdown_signal().await;
    engine.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
