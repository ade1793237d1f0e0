//! Handle proving ownership of an acquired lock.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use stockguard_common::LockToken;

use crate::local_registry::LocalGuard;

/// Which mechanism is holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Held in the shared store; excludes every process.
    Distributed,
    /// Held in the process-local registry; excludes this process only.
    LocalFallback,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Distributed => write!(f, "distributed"),
            LockMode::LocalFallback => write!(f, "local-fallback"),
        }
    }
}

/// An acquired lock.
///
/// Pass it back to `LockCoordinator::release_lock`. Every handle carries the
/// key's process-local guard, which is released on drop. A distributed handle
/// dropped without release stays held in the store until its lease runs out.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    store_key: String,
    token: LockToken,
    acquired_at: Instant,
    lease_expiry: Option<Instant>,
    mode: LockMode,
    local_guard: Option<LocalGuard>,
}

impl LockHandle {
    pub(crate) fn distributed(
        key: String,
        store_key: String,
        token: LockToken,
        lease: Duration,
        guard: LocalGuard,
    ) -> Self {
        let now = Instant::now();
        Self {
            key,
            store_key,
            token,
            acquired_at: now,
            lease_expiry: now.checked_add(lease),
            mode: LockMode::Distributed,
            local_guard: Some(guard),
        }
    }

    pub(crate) fn local(key: String, guard: LocalGuard) -> Self {
        Self {
            store_key: key.clone(),
            key,
            token: LockToken::generate(),
            acquired_at: Instant::now(),
            lease_expiry: None,
            mode: LockMode::LocalFallback,
            local_guard: Some(guard),
        }
    }

    /// Logical lock key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Namespaced key used in the store.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Ownership token.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Mechanism holding the lock.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Check if the lock only excludes this process.
    pub fn is_degraded(&self) -> bool {
        self.mode == LockMode::LocalFallback
    }

    /// When the lease runs out. `None` for local locks, which have no lease.
    pub fn lease_expiry(&self) -> Option<Instant> {
        self.lease_expiry
    }

    /// Check if the lease has run out; the lock may belong to someone else now.
    pub fn is_lease_expired(&self) -> bool {
        self.lease_expiry
            .map(|expiry| Instant::now() >= expiry)
            .unwrap_or(false)
    }

    /// Time left on the lease. `None` for local locks.
    pub fn remaining_lease(&self) -> Option<Duration> {
        self.lease_expiry
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
    }

    /// How long the lock has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub(crate) fn take_local_guard(&mut self) -> Option<LocalGuard> {
        self.local_guard.take()
    }
}
