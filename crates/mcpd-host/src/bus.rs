//! Local fan-out of the manager's push stream.
//!
//! Every [`MessageResponse`] received from the GameManager is
//! delivered to every registered channel with the same bounded,
//! non-blocking policy the manager applies on its side: a full channel
//! drops the message for that consumer only.
//!
//! [`register_log_processor`](MessageBus::register_log_processor)
//! layers a callback on top: a dispatch task filters `stdout` messages
//! and invokes the callback with `(line, locked)`.

use mcpd_proto::MessageResponse;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-consumer channel capacity, matching the manager's subscriber
/// FIFOs.
pub const BUS_CHANNEL_CAPACITY: usize = 16384;

struct BusEntry {
    id: u64,
    owner: String,
    tx: mpsc::Sender<MessageResponse>,
}

/// Fan-out hub for manager messages inside the PluginHost.
pub struct MessageBus {
    channels: RwLock<Vec<BusEntry>>,
    next_id: AtomicU64,
}

/// A registered bus channel. Unregisters itself on drop.
pub struct BusSubscription {
    pub rx: mpsc::Receiver<MessageResponse>,
    id: u64,
    bus: Weak<MessageBus>,
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Keeps a log-processor dispatch task alive; dropping the handle
/// stops dispatch and unregisters the underlying channel.
pub struct LogProcessorHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for LogProcessorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a raw message channel.
    pub fn subscribe(self: &Arc<Self>, owner: impl Into<String>) -> BusSubscription {
        let (tx, rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let owner = owner.into();
        debug!(%owner, "bus channel registered");
        self.channels.write().push(BusEntry { id, owner, tx });
        BusSubscription {
            rx,
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.channels.write().retain(|entry| entry.id != id);
    }

    /// Registers a callback over `stdout` lines. The callback receives
    /// the line content and whether the write lock was held when the
    /// line was scanned.
    pub fn register_log_processor<F>(
        self: &Arc<Self>,
        owner: impl Into<String>,
        process: F,
    ) -> LogProcessorHandle
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        let owner = owner.into();
        debug!(%owner, "log processor registered");
        let mut sub = self.subscribe(owner);
        let task = tokio::spawn(async move {
            while let Some(msg) = sub.rx.recv().await {
                if msg.is_stdout() {
                    process(&msg.content, msg.locked);
                }
            }
        });
        LogProcessorHandle { task }
    }

    /// Delivers `msg` to every channel without blocking.
    pub fn publish(&self, msg: &MessageResponse) {
        let channels = self.channels.read();
        for entry in channels.iter() {
            match entry.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(owner = %entry.owner, "bus channel full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}
