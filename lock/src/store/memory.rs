//! In-process [`AtomicStore`] with lease expiry.
//!
//! Stands in for Redis in tests and the simulator. Both primitives run under
//! the map's shard lock, so they are atomic with respect to each other. An
//! availability switch and a failure budget let callers exercise the
//! degradation path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{AtomicStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// TTL-aware in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    available: AtomicBool,
    failures_remaining: AtomicU32,
}

impl MemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Switch the store on or off. While off every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail with a connectivity error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Current live value of `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Number of live keys.
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    fn check_available(&self) -> StoreResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }

        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Unavailable("injected connectivity failure".to_string()));
        }

        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;

        // Redis takes whole milliseconds; `PX 0` is an error there too.
        let now = Instant::now();
        let expires_at = match now.checked_add(ttl) {
            Some(at) if ttl.as_millis() > 0 => at,
            _ => return Err(StoreError::Command("invalid expire time".to_string())),
        };
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at,
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_available()?;

        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, stored| stored.is_live(now) && stored.value == expected);

        if removed.is_none() {
            // Expired entries are dead weight either way.
            self.entries.remove_if(key, |_, stored| !stored.is_live(now));
        }

        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);

        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_compare_and_delete_requires_match() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "a", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!store.compare_and_delete("k", "b").await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));

        assert!(store.compare_and_delete("k", "a").await.unwrap());
        assert_eq!(store.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_value_can_be_replaced() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "a", Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(store.get("k"), None);
        assert!(!store.compare_and_delete("k", "a").await.unwrap());
        assert!(store
            .set_if_absent("k", "b", Duration::from_millis(100))
            .await
            .unwrap());
        assert_eq!(store.get("k").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_connectivity() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store
            .set_if_absent("k", "a", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_connectivity());

        store.set_available(true);
        store.fail_next(1);
        assert!(store
            .compare_and_delete("k", "a")
            .await
            .unwrap_err()
            .is_connectivity());
        assert!(!store.compare_and_delete("k", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_sub_millisecond_ttl_is_a_command_error() {
        let store = MemoryStore::new();
        for ttl in [Duration::ZERO, Duration::from_micros(500)] {
            let err = store.set_if_absent("k", "a", ttl).await.unwrap_err();
            assert!(!err.is_connectivity());
        }
        assert_eq!(store.get("k"), None);
    }
}
