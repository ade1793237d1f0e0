//! Process-local lock registry used when the store is unreachable.
//!
//! Provides mutual exclusion within one process only. Each key maps to an
//! async mutex; the returned guard owns the lock, so only the holder can
//! release it, by dropping the guard.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use stockguard_common::{CancelSignal, Result, StockGuardError};

/// Guard for a lock held through the local registry.
#[derive(Debug)]
pub struct LocalGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LocalGuard {
    /// Key this guard protects.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Concurrent map of per-key mutexes.
///
/// Entries are created lazily and kept until [`LocalLockRegistry::prune_idle`]
/// is called, so the map is bounded by the number of distinct keys.
#[derive(Debug, Default)]
pub struct LocalLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait up to `timeout` for the lock on `key`.
    ///
    /// Returns `Ok(None)` on timeout and [`StockGuardError::Cancelled`] if
    /// `cancel` fires first.
    pub async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Option<LocalGuard>> {
        let mutex = self.mutex_for(key);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StockGuardError::Cancelled(key.to_string())),
            locked = tokio::time::timeout(timeout, mutex.lock_owned()) => match locked {
                Ok(guard) => {
                    debug!(lock_key = %key, "Local lock acquired");
                    Ok(Some(LocalGuard {
                        key: key.to_string(),
                        _guard: guard,
                    }))
                }
                Err(_) => Ok(None),
            },
        }
    }

    /// Take the lock on `key` only if it is free right now.
    pub fn try_acquire(&self, key: &str) -> Option<LocalGuard> {
        self.mutex_for(key)
            .try_lock_owned()
            .ok()
            .map(|guard| LocalGuard {
                key: key.to_string(),
                _guard: guard,
            })
    }

    /// Check if `key` is currently held locally.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys with a registry entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop entries that nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // Holders and waiters keep their own `Arc`; the map's reference is the
        // only one left for idle keys. `mutex_for` clones under the same shard
        // lock, so it cannot race this check.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            debug!(removed, "Pruned idle local locks");
        }
        removed
    }
}
