//! ipcam Daemon - Main entry point
//!
//! Polls the configured IP cameras on their own intervals and serves the
//! published images, latency and health over HTTP and WebSocket.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ipcam")]
#[command(about = "IP camera image poller and publisher")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ipcam.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Poll every camera once and exit
    #[arg(long)]
    poll_once: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", config::default_config_toml()?);
        return Ok(());
    }

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("ipcam v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        cameras = config.cameras.len(),
        image_folder = %config.poller.image_folder,
        tick_ms = config.poller.tick_millis,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if args.poll_once {
        info!("Polling every camera once");
        let results = state.poller_service().poll_all_once().await;
        println!("Polled {} cameras:", results.len());
        for (device, result) in results {
            match result {
                Ok(image) => println!("  - {}: {} bytes", device, image.len()),
                Err(e) => println!("  - {}: {}", device, e),
            }
        }
        return Ok(());
    }

    // Daemon mode - poll in the background and serve until ctrl-c
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(state.poller_service().run(shutdown_rx));

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
    };

    if let Err(e) = server::run(state, &config.daemon.bind, config.daemon.tls.as_ref(), shutdown).await {
        poller.abort();
        return Err(e);
    }
    if let Err(e) = poller.await {
        error!(error = %e, "Poller task failed");
    }
    Ok(())
}
