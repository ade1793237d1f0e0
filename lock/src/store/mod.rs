//! Atomic key-value store client used as the lock authority.
//!
//! The coordinator depends on exactly two server-side atomic primitives:
//! set-if-absent with expiry, and compare-then-delete. Connectivity failures
//! are reported separately from command failures so that only genuine
//! unavailability triggers the local fallback.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stockguard_common::StockGuardError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Errors raised by an [`AtomicStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (I/O, refused, dropped, timed out).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected the command.
    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Check if this error means the store is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<StoreError> for StockGuardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => StockGuardError::StoreUnavailable(msg),
            StoreError::Command(msg) => StockGuardError::StoreCommand(msg),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store exposing the two atomic lock primitives.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Set `key` to `value` with expiry `ttl` only if the key is absent.
    /// Returns `true` if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key` only if its current value equals `expected`, atomically.
    /// Returns `true` if the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;
}
