//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Releases its lock when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Guard running `release` on drop.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Keyed lock service taken around each call.
#[async_trait]
pub trait CallLock: Send + Sync + 'static {
    /// Wait for `key` and hold it until the guard drops.
    async fn acquire(&self, key: &str) -> LockGuard;
}

/// Lock service that never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocks;

#[async_trait]
impl CallLock for NoopLocks {
    async fn acquire(&self, _key: &str) -> LockGuard {
        LockGuard::noop()
    }
}

/// A lock currently held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldLock {
    /// Lock key.
    pub key: String,
    /// How long it has been held.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub held_for: Duration,
}

fn as_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

#[derive(Default)]
struct KeyState {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
    held_since: Option<Instant>,
}

/// Per-key async mutexes, pruned once nobody holds or waits on a key.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    keys: Arc<Mutex<HashMap<String, KeyState>>>,
}

impl KeyedLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with a holder or waiter.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether no key is in use.
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Locks currently held, longest first.
    pub fn held(&self) -> Vec<HeldLock> {
        let now = Instant::now();
        let mut held: Vec<HeldLock> = self
            .keys
            .lock()
            .iter()
            .filter_map(|(key, state)| {
                state.held_since.map(|since| HeldLock {
                    key: key.clone(),
                    held_for: now - since,
                })
            })
            .collect();
        held.sort_by(|a, b| b.held_for.cmp(&a.held_for));
        held
    }

    /// Locks held longer than `threshold`, longest first.
    pub fn long_held(&self, threshold: Duration) -> Vec<HeldLock> {
        self.held()
            .into_iter()
            .filter(|lock| lock.held_for > threshold)
            .collect()
    }

    /// Every `interval`, warn about locks held longer than `threshold`.
    pub fn spawn_monitor(&self, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        let locks = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let long = locks.long_held(threshold);
                if long.is_empty() {
                    continue;
                }
                warn!(count = long.len(), "locks are taking longer than expected");
                for lock in long.iter().take(100) {
                    warn!(key = %lock.key, held_ms = lock.held_for.as_millis() as u64, "long-held lock");
                }
            }
        })
    }

    fn release(&self, key: &str) {
        self.leave(key, true);
    }

    fn leave(&self, key: &str, was_holder: bool) {
        let mut keys = self.keys.lock();
        if let Some(state) = keys.get_mut(key) {
            state.users = state.users.saturating_sub(1);
            if was_holder {
                state.held_since = None;
            }
            if state.users == 0 {
                keys.remove(key);
            }
        }
    }
}

/// Drops a waiter's claim on a key if its acquire is cancelled.
struct Waiting<'a> {
    locks: &'a KeyedLocks,
    key: &'a str,
    armed: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.locks.leave(self.key, false);
        }
    }
}

#[async_trait]
impl CallLock for KeyedLocks {
    async fn acquire(&self, key: &str) -> LockGuard {
        let mutex = {
            let mut keys = self.keys.lock();
            let state = keys.entry(key.to_owned()).or_default();
            state.users += 1;
            state.mutex.clone()
        };
        let mut waiting = Waiting {
            locks: self,
            key,
            armed: true,
        };
        let held = mutex.lock_owned().await;
        waiting.armed = false;
        if let Some(state) = self.keys.lock().get_mut(key) {
            state.held_since = Some(Instant::now());
        }
        let locks = self.clone();
        let key = key.to_owned();
        LockGuard::new(move || {
            locks.release(&key);
            drop(held);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn same_key_is_exclusive_and_pruned() {
        let locks = KeyedLocks::new();
        let first = locks.acquire("rotate/a").await;
        assert_eq!(locks.held().len(), 1);

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let locks = locks.clone();
            let acquired = acquired.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("rotate/a").await;
                acquired.store(true, Ordering::SeqCst);
            })
        };
        tokio::task::yield_now().await;
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.await.expect("waiter");
        assert!(acquired.load(Ordering::SeqCst));
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn long_held_reports_old_locks_first() {
        let locks = KeyedLocks::new();
        let _old = locks.acquire("old").await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        let _new = locks.acquire("new").await;
        tokio::time::advance(Duration::from_millis(10)).await;

        let held = locks.held();
        assert_eq!(held[0].key, "old");
        let long = locks.long_held(Duration::from_secs(1));
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].key, "old");
        assert!(long[0].held_for >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_pin_the_key() {
        let locks = KeyedLocks::new();
        let holder = locks.acquire("rotate/a").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("rotate/a").await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        assert!(waiter.await.is_err());
        assert_eq!(locks.held().len(), 1);

        drop(holder);
        assert!(locks.is_empty());
    }
}
