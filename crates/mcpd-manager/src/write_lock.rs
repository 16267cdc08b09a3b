//! The console write lock.
//!
//! Exactly one client may write to the child's stdin at a time. The
//! lock is a lease: every acquisition, renewal, or successful write
//! resets a 10 s deadline, and an expiry task releases the lock as if
//! the holder had unlocked. Waiters are served in arrival order.
//!
//! Re-acquisition by the current holder is a renewal, not a re-entrant
//! count; a single `unlock` always releases.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lease duration. The lock is forcibly released this long after the
/// last acquisition, renewal, or write.
pub const LOCK_MAX_TIME: Duration = Duration::from_secs(10);

struct Waiter {
    client: u64,
    tx: oneshot::Sender<()>,
}

struct LockState {
    holder: Option<u64>,
    /// Lease deadline; meaningful only while `holder` is set.
    deadline: Instant,
    /// Bumped on every grant and release (not on renewal). Lets the
    /// expiry task detect that "its" acquisition is gone.
    acq: u64,
    waiters: VecDeque<Waiter>,
}

/// Leased exclusive ownership of the child's stdin.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct WriteLock {
    state: Arc<Mutex<LockState>>,
}

impl WriteLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState {
                holder: None,
                deadline: Instant::now(),
                acq: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Blocks until the lock is granted to `client`.
    ///
    /// If `client` already holds the lock this renews the lease and
    /// returns immediately. Waiters are queued FIFO. Dropping the
    /// returned future while queued abandons the pending acquisition;
    /// the grant pass skips abandoned waiters.
    pub async fn lock(&self, client: u64) {
        let rx = {
            let mut s = self.state.lock().unwrap();
            if s.holder == Some(client) {
                s.deadline = Instant::now() + LOCK_MAX_TIME;
                debug!(client, "write lock renewed");
                return;
            }
            if s.holder.is_none() && s.waiters.is_empty() {
                grant_to(&self.state, &mut s, client);
                return;
            }
            let (tx, rx) = oneshot::channel();
            s.waiters.push_back(Waiter { client, tx });
            rx
        };
        // Err means the WriteLock itself was torn down; the caller no
        // longer holds anything either way.
        let _ = rx.await;
    }

    /// Releases the lock iff `client` holds it; otherwise a no-op.
    pub fn unlock(&self, client: u64) {
        let mut s = self.state.lock().unwrap();
        if s.holder == Some(client) {
            s.holder = None;
            s.acq += 1;
            debug!(client, "write lock released");
            grant_next(&self.state, &mut s);
        }
    }

    /// Renews the lease iff `client` holds the lock.
    ///
    /// Returns false without side effects otherwise. Used on every
    /// successful `Write`; intentionally quieter than [`lock`](Self::lock).
    pub fn renew_if_holder(&self, client: u64) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.holder == Some(client) {
            s.deadline = Instant::now() + LOCK_MAX_TIME;
            true
        } else {
            false
        }
    }

    /// Current holder, if any.
    #[must_use]
    pub fn holder(&self) -> Option<u64> {
        self.state.lock().unwrap().holder
    }

    /// True iff some client holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }
}

impl Default for WriteLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Grants to `client` directly (fast path, no queue).
fn grant_to(state: &Arc<Mutex<LockState>>, s: &mut LockState, client: u64) {
    s.holder = Some(client);
    s.deadline = Instant::now() + LOCK_MAX_TIME;
    s.acq += 1;
    info!(client, "write lock granted");
    spawn_expiry(state.clone(), client, s.acq);
}

/// Hands the lock to the first still-waiting queued client.
fn grant_next(state: &Arc<Mutex<LockState>>, s: &mut LockState) {
    while let Some(waiter) = s.waiters.pop_front() {
        let client = waiter.client;
        if waiter.tx.send(()).is_ok() {
            s.holder = Some(client);
            s.deadline = Instant::now() + LOCK_MAX_TIME;
            s.acq += 1;
            info!(client, "write lock granted");
            spawn_expiry(state.clone(), client, s.acq);
            return;
        }
        debug!(client, "queued lock waiter gone, skipping");
    }
}

/// One expiry task per acquisition. Sleeps to the deadline; a renewal
/// moves the deadline and the task just sleeps again. Exits silently
/// once the acquisition it was armed for is over.
fn spawn_expiry(state: Arc<Mutex<LockState>>, client: u64, acq: u64) {
    tokio::spawn(async move {
        loop {
            let deadline = {
                let s = state.lock().unwrap();
                if s.acq != acq {
                    return;
                }
                s.deadline
            };
            if Instant::now() >= deadline {
                let mut s = state.lock().unwrap();
                if s.acq == acq && Instant::now() >= s.deadline {
                    warn!(client, "write lock expired, releasing");
                    s.holder = None;
                    s.acq += 1;
                    grant_next(&state, &mut s);
                }
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test]
    async fn exclusive_holder() {
        let lock = WriteLock::new();
        lock.lock(1).await;
        assert_eq!(lock.holder(), Some(1));

        // A second client stays queued until release.
        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            lock2.lock(2).await;
        });
        tokio::task::yield_now().await;
        assert_eq!(lock.holder(), Some(1));

        lock.unlock(1);
        waiter.await.unwrap();
        assert_eq!(lock.holder(), Some(2));
    }

    #[tokio::test]
    async fn reacquire_is_renewal_not_reentrant() {
        let lock = WriteLock::new();
        lock.lock(1).await;
        lock.lock(1).await;
        // One unlock fully releases.
        lock.unlock(1);
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn unlock_by_non_holder_is_noop() {
        let lock = WriteLock::new();
        lock.lock(1).await;
        lock.unlock(2);
        assert_eq!(lock.holder(), Some(1));
    }

    #[tokio::test]
    async fn renew_if_holder_checks_identity() {
        let lock = WriteLock::new();
        lock.lock(1).await;
        assert!(lock.renew_if_holder(1));
        assert!(!lock.renew_if_holder(2));
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_and_queued_waiter_is_granted() {
        let lock = WriteLock::new();
        lock.lock(1).await;

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            lock2.lock(2).await;
        });
        tokio::task::yield_now().await;

        advance(LOCK_MAX_TIME + Duration::from_millis(10)).await;
        waiter.await.unwrap();
        assert_eq!(lock.holder(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_defers_expiry() {
        let lock = WriteLock::new();
        lock.lock(1).await;

        advance(Duration::from_secs(6)).await;
        lock.lock(1).await; // renew at t=6s
        advance(Duration::from_secs(6)).await; // t=12s, deadline is 16s
        assert_eq!(lock.holder(), Some(1));

        advance(Duration::from_secs(5)).await; // past 16s
        tokio::task::yield_now().await;
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn waiters_granted_in_fifo_order() {
        let lock = WriteLock::new();
        lock.lock(1).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for client in 2..=5u64 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                lock.lock(client).await;
                order.lock().unwrap().push(client);
                lock.unlock(client);
            }));
            // Let each waiter enqueue before the next arrives.
            tokio::task::yield_now().await;
        }

        lock.unlock(1);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn cancelled_waiter_is_skipped() {
        let lock = WriteLock::new();
        lock.lock(1).await;

        let lock2 = lock.clone();
        let cancelled = tokio::spawn(async move {
            lock2.lock(2).await;
        });
        tokio::task::yield_now().await;
        cancelled.abort();
        let _ = cancelled.await;

        let lock3 = lock.clone();
        let survivor = tokio::spawn(async move {
            lock3.lock(3).await;
        });
        tokio::task::yield_now().await;

        lock.unlock(1);
        survivor.await.unwrap();
        assert_eq!(lock.holder(), Some(3));
    }
}
