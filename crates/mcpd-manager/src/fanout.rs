//! Log fan-out.
//!
//! Every line scanned from the child (and every lifecycle event) is
//! delivered to every live subscriber through a bounded FIFO. Delivery
//! never blocks: a full FIFO drops the message for that subscriber
//! only, bumps its drop counter, and logs a diagnostic with the
//! subscriber's owner tag.
//!
//! Subscribe/unsubscribe run under the write half of a reader/writer
//! lock, so delivery (read half) is never blocked by list mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::warn;

/// Per-subscriber FIFO capacity.
pub const SUBSCRIBER_CAPACITY: usize = 16384;

/// One fanned-out item. Lifecycle events are multiplexed onto the same
/// subscriber FIFOs as console lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A console line, with the write-lock snapshot taken when it was
    /// scanned.
    Stdout { content: String, locked: bool },
    /// A lifecycle token such as `GameServerStop`.
    StateChange { content: String },
}

struct SubEntry {
    id: u64,
    owner: String,
    tx: mpsc::Sender<StreamEvent>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out hub. Shared by the scanner, the supervisor, and every
/// Message stream.
pub struct LogFanout {
    subs: RwLock<Vec<SubEntry>>,
    next_id: AtomicU64,
}

/// A live subscription. Unsubscribes itself on drop.
pub struct Subscription {
    pub rx: mpsc::Receiver<StreamEvent>,
    id: u64,
    fanout: Weak<LogFanout>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Messages dropped for this subscriber because its FIFO was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.unsubscribe(self.id);
        }
    }
}

impl LogFanout {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subs: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a subscriber with the default FIFO capacity.
    pub fn subscribe(self: &Arc<Self>, owner: impl Into<String>) -> Subscription {
        self.subscribe_with_capacity(owner, SUBSCRIBER_CAPACITY)
    }

    /// Registers a subscriber with an explicit FIFO capacity.
    pub fn subscribe_with_capacity(
        self: &Arc<Self>,
        owner: impl Into<String>,
        capacity: usize,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subs.write().unwrap().push(SubEntry {
            id,
            owner: owner.into(),
            tx,
            dropped: dropped.clone(),
        });
        Subscription {
            rx,
            id,
            fanout: Arc::downgrade(self),
            dropped,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subs.write().unwrap().retain(|entry| entry.id != id);
    }

    /// Delivers `event` to every subscriber without blocking.
    pub fn publish(&self, event: StreamEvent) {
        let subs = self.subs.read().unwrap();
        for entry in subs.iter() {
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(owner = %entry.owner, total, "subscriber queue full, dropping message");
                }
                // Receiver gone; the Drop impl will purge the entry.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subs.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(content: &str) -> StreamEvent {
        StreamEvent::Stdout {
            content: content.to_string(),
            locked: false,
        }
    }

    #[tokio::test]
    async fn delivers_in_order_to_every_subscriber() {
        let fanout = LogFanout::new();
        let mut a = fanout.subscribe("a");
        let mut b = fanout.subscribe("b");

        for i in 0..10 {
            fanout.publish(line(&format!("line {i}")));
        }

        for sub in [&mut a, &mut b] {
            for i in 0..10 {
                match sub.rx.recv().await.unwrap() {
                    StreamEvent::Stdout { content, .. } => {
                        assert_eq!(content, format!("line {i}"));
                    }
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_affecting_peer() {
        let fanout = LogFanout::new();
        let slow = fanout.subscribe_with_capacity("slow", 4);
        let mut fast = fanout.subscribe_with_capacity("fast", 64);

        for i in 0..14 {
            fanout.publish(line(&format!("line {i}")));
        }

        // The slow FIFO kept the first 4, dropped the other 10.
        assert_eq!(slow.dropped(), 10);
        let mut fast_count = 0;
        while fast.rx.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, 14);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let fanout = LogFanout::new();
        let sub = fanout.subscribe("transient");
        assert_eq!(fanout.subscriber_count(), 1);
        drop(sub);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn state_change_is_multiplexed() {
        let fanout = LogFanout::new();
        let mut sub = fanout.subscribe("s");
        fanout.publish(line("a line"));
        fanout.publish(StreamEvent::StateChange {
            content: "GameServerStop".into(),
        });

        assert!(matches!(
            sub.rx.recv().await.unwrap(),
            StreamEvent::Stdout { .. }
        ));
        match sub.rx.recv().await.unwrap() {
            StreamEvent::StateChange { content } => assert_eq!(content, "GameServerStop"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
