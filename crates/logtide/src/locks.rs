//! Advisory locks guarding lazy worker starts.
//!
//! Lazy start of a source's recent-logs cache takes the lock keyed
//! `("recent_logs", source_id)` so at most one start happens per
//! source; the guard is dropped immediately after the child-start call
//! returns, regardless of outcome. Locks are node-local here; a
//! multi-node deployment swaps this for its distributed lock behind the
//! same call shape.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::source::SourceId;

/// Lock key: a scope tag plus the source it guards.
pub type LockKey = (&'static str, SourceId);

/// Keyed advisory locks.
#[derive(Default)]
pub struct AdvisoryLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl AdvisoryLocks {
    #[must_use]
    pub fn new() -> Self {
        AdvisoryLocks::default()
    }

    /// Acquires the lock for `key`, waiting behind any current holder.
    /// The lock is released when the returned guard drops.
    pub async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_acquire_serializes_holders_per_key() {
        let locks = Arc::new(AdvisoryLocks::new());
        let running = Arc::new(AtomicUsize::new(0));
        let key = ("recent_logs", SourceId(1));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let running = Arc::clone(&running);
                tokio::spawn(async move {
                    let _guard = locks.acquire(key).await;
                    let holders = running.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(holders, 0, "lock held by more than one task");
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = AdvisoryLocks::new();
        let _a = locks.acquire(("recent_logs", SourceId(1))).await;
        // a different source's lock is immediately available
        let _b = locks.acquire(("recent_logs", SourceId(2))).await;
    }
}
