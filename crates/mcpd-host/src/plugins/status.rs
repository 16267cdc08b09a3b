//! Server status plugin.
//!
//! Polls the manager for state and memory usage and the console for
//! the player list, and answers the in-chat `!!status` command. The
//! poller is a background task gated on the started flag, so `pause`
//! silences it without tearing it down.

use crate::error::HostError;
use crate::host::Host;
use crate::plugin::Plugin;
use crate::plugins::chat_command::{CommandFuture, CommandHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Pausable status reporter.
pub struct StatusPlugin {
    poll_interval: Duration,
    running: watch::Sender<bool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StatusPlugin {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }

    #[must_use]
    pub fn with_interval(poll_interval: Duration) -> Arc<Self> {
        let (running, _) = watch::channel(false);
        Arc::new(Self {
            poll_interval,
            running,
            task: Mutex::new(None),
        })
    }
}

fn status_command(host: Arc<Host>) -> CommandHandler {
    Arc::new(move |player, _args| {
        let host = Arc::clone(&host);
        Box::pin(async move {
            let Ok(status) = host.status().await else {
                return;
            };
            let memory_mib = status.usedmemory / (1024 * 1024);
            let message = serde_json::json!({
                "text": format!("Server {} ({} MiB)", status.state, memory_mib)
            });
            host.run_command(&format!("tellraw {player} {message}")).await;
        }) as CommandFuture
    })
}

#[async_trait]
impl Plugin for StatusPlugin {
    fn name(&self) -> &str {
        "status"
    }

    fn display_name(&self) -> &str {
        "Server Status"
    }

    async fn init(&self, host: &Arc<Host>) -> Result<(), HostError> {
        host.register_command("status", "status", status_command(Arc::clone(host)))?;

        let host = Arc::clone(host);
        let interval = self.poll_interval;
        let mut running = self.running.subscribe();
        let task = tokio::spawn(async move {
            loop {
                // Park while paused.
                while !*running.borrow_and_update() {
                    if running.changed().await.is_err() {
                        return;
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match host.status().await {
                            Ok(status) => {
                                let players = host.run_command("list").await;
                                host.println(
                                    "Status",
                                    &format!(
                                        "state={} memory={}MiB {}",
                                        status.state,
                                        status.usedmemory / (1024 * 1024),
                                        players
                                    ),
                                );
                            }
                            Err(err) => debug!(error = %err, "status poll failed"),
                        }
                    }
                    changed = running.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn start(&self) {
        self.running.send_replace(true);
    }

    async fn pause(&self) {
        self.running.send_replace(false);
    }
}
