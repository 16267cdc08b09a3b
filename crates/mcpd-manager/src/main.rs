//! GameManager daemon.
//!
//! Binds the loopback RPC listener, serves clients until SIGINT or
//! SIGTERM, then stops the game process before exiting. The only fatal
//! startup condition is failing to bind the listener.

use anyhow::Context;
use clap::Parser;
use mcpd_manager::Manager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// GameManager: supervises the game server and serves its console over RPC.
#[derive(Parser, Debug)]
#[command(name = "mcpd-manager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Loopback address to listen on.
    #[arg(long, default_value = mcpd_proto::DEFAULT_ADDRESS)]
    listen: String,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("cannot bind listener on {}", args.listen))?;
    info!(addr = %args.listen, "GameManager started, waiting for clients");

    let manager = Manager::new();
    let serve = tokio::spawn(Arc::clone(&manager).serve(listener));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping game server");
    if let Err(err) = manager.supervisor.stop().await {
        tracing::warn!(error = %err, "game server stop failed during shutdown");
    }
    serve.abort();
    info!("GameManager shut down");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable, waiting on SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
