//! PluginHost daemon.
//!
//! Dials the GameManager (retrying every 5 s until the first full
//! bring-up succeeds), registers the bundled plugins, optionally
//! attaches the REPL, and parks until SIGINT/SIGTERM or `exit` at the
//! prompt.

use anyhow::Result;
use clap::Parser;
use mcpd_host::plugins::StatusPlugin;
use mcpd_host::repl::ReplPlugin;
use mcpd_host::{Host, HostConfig, Plugin};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DIAL_RETRY: Duration = Duration::from_secs(5);

/// PluginHost: drives the game console and hosts mcpd plugins.
#[derive(Parser, Debug)]
#[command(name = "mcpd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the game start script used by Start.
    #[arg(long, default_value = "./run.sh")]
    script: PathBuf,

    /// GameManager address.
    #[arg(long, default_value = mcpd_proto::DEFAULT_ADDRESS)]
    address: String,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Run without the interactive console.
    #[arg(long)]
    no_repl: bool,
}

/// Accepts the historical single-dash spelling `-script` (with or
/// without `=value`). Clap reads single-dash tokens as short flags, so
/// the synonym is rewritten to the long form before parsing.
fn normalize_script_flag<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-script") => OsString::from("--script"),
            Some(s) if s.starts_with("-script=") => OsString::from(format!("-{s}")),
            _ => arg,
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_from(normalize_script_flag(std::env::args_os()));

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let host = Host::new(HostConfig::new(
        args.address.clone(),
        args.script.display().to_string(),
    ));

    // First bring-up: keep dialing until connect + login + subscribe +
    // game start all succeed. After that the host's own reconnect loop
    // takes over.
    loop {
        match host.run().await {
            Ok(()) => break,
            Err(err) => {
                warn!(error = %err, "bring-up failed, retrying");
                tokio::time::sleep(DIAL_RETRY).await;
            }
        }
    }

    let status: Arc<dyn Plugin> = StatusPlugin::new();
    host.register_plugin(status).await?;
    if !args.no_repl {
        let repl: Arc<dyn Plugin> = ReplPlugin::new();
        host.register_plugin(repl).await?;
    }

    info!("PluginHost up");
    tokio::select! {
        () = host.wait_shutdown() => info!("shutdown requested from console"),
        () = wait_for_shutdown_signal() => info!("shutdown signal received"),
    }
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
            warn!(error = %err, "SIGTERM handler unavailable, waiting on SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
