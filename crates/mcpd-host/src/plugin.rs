//! The plugin ABI.
//!
//! A plugin is anything with a stable name, a display name, and the
//! three lifecycle hooks. The host drives the lifecycle:
//!
//! ```text
//!  register ──► init (at most once)
//!                 │
//!                 ▼
//!      ┌──── started ◄────┐
//!  pause│                 │start
//!      ▼└──── paused ─────┘
//! ```
//!
//! `start` is invoked when the game becomes ready (and immediately at
//! init if it already is); `pause` when the game stops or the manager
//! connection is lost. Both are idempotent at the handle level: the
//! plugin only ever sees alternating start/pause calls.

use crate::error::HostError;
use crate::host::Host;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Implemented by every plugin. The host handle passed to `init` is
/// the plugin's door to the console, the log stream, and sibling
/// plugins; plugins store it and must not outlive the host.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable registry key.
    fn name(&self) -> &str;

    /// Human-facing name used in diagnostics.
    fn display_name(&self) -> &str;

    /// One-time setup. Runs before the game is necessarily ready;
    /// command execution belongs in `start`.
    async fn init(&self, host: &Arc<Host>) -> Result<(), HostError>;

    /// The game is ready for commands.
    async fn start(&self);

    /// The game stopped or the manager connection dropped. Background
    /// work must go quiet until the next `start`.
    async fn pause(&self);
}

/// Registry entry wrapping a plugin with its lifecycle state.
pub struct PluginHandle {
    plugin: Arc<dyn Plugin>,
    started: Mutex<bool>,
}

impl PluginHandle {
    #[must_use]
    pub fn new(plugin: Arc<dyn Plugin>) -> Arc<Self> {
        Arc::new(Self {
            plugin,
            started: Mutex::new(false),
        })
    }

    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Runs the plugin's `init`.
    pub async fn init(&self, host: &Arc<Host>) -> Result<(), HostError> {
        info!(plugin = self.plugin.display_name(), "loading plugin");
        if let Err(err) = self.plugin.init(host).await {
            warn!(
                plugin = self.plugin.display_name(),
                error = %err,
                "plugin failed to load"
            );
            return Err(HostError::PluginInit {
                name: self.plugin.name().to_string(),
                reason: err.to_string(),
            });
        }
        info!(plugin = self.plugin.display_name(), "plugin loaded");
        Ok(())
    }

    /// Starts the plugin if it is not already started.
    pub async fn start(&self) {
        let transition = {
            let mut started = self.started.lock();
            if *started {
                false
            } else {
                *started = true;
                true
            }
        };
        if transition {
            self.plugin.start().await;
        }
    }

    /// Pauses the plugin if it is started.
    pub async fn pause(&self) {
        let transition = {
            let mut started = self.started.lock();
            if *started {
                *started = false;
                true
            } else {
                false
            }
        };
        if transition {
            self.plugin.pause().await;
        }
    }
}
