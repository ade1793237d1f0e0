//! Metrics collection for lock coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock coordinator metrics.
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Locks acquired through the store.
    pub acquired_distributed: AtomicU64,
    /// Locks acquired through the local fallback.
    pub acquired_local: AtomicU64,
    /// Locks currently held by this process.
    pub active: AtomicU64,
    /// Acquisitions that timed out.
    pub timeouts: AtomicU64,
    /// Acquisitions cancelled by the caller.
    pub cancellations: AtomicU64,
    /// Successful releases.
    pub released: AtomicU64,
    /// Releases whose token no longer matched.
    pub release_mismatches: AtomicU64,
    /// Connectivity errors returned by the store.
    pub store_errors: AtomicU64,
    /// Times acquisition fell back to local locking.
    pub degradations: AtomicU64,
}

impl LockMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lock acquired through the store.
    pub fn distributed_acquired(&self) {
        self.acquired_distributed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock acquired through the local fallback.
    pub fn local_acquired(&self) {
        self.acquired_local.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock handed back, whether or not the store still held it.
    pub fn lock_returned(&self, released: bool) {
        if released {
            self.released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.release_mismatches.fetch_add(1, Ordering::Relaxed);
        }
        // Saturating: handles released via `release_token` were never counted active.
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record an acquisition timeout.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled acquisition.
    pub fn cancelled(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store connectivity error.
    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fall back to local locking.
    pub fn degraded(&self) {
        self.degradations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquired_distributed: self.acquired_distributed.load(Ordering::Relaxed),
            acquired_local: self.acquired_local.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            release_mismatches: self.release_mismatches.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            degradations: self.degradations.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, &str, u64); 9] = [
            ("stockguard_lock_acquired_distributed", "counter", "Locks acquired through the store", s.acquired_distributed),
            ("stockguard_lock_acquired_local", "counter", "Locks acquired through the local fallback", s.acquired_local),
            ("stockguard_lock_active", "gauge", "Locks currently held by this process", s.active),
            ("stockguard_lock_timeouts", "counter", "Lock acquisitions that timed out", s.timeouts),
            ("stockguard_lock_cancellations", "counter", "Lock acquisitions cancelled by the caller", s.cancellations),
            ("stockguard_lock_released", "counter", "Locks released", s.released),
            ("stockguard_lock_release_mismatches", "counter", "Releases with a stale or foreign token", s.release_mismatches),
            ("stockguard_lock_store_errors", "counter", "Store connectivity errors", s.store_errors),
            ("stockguard_lock_degradations", "counter", "Fallbacks to process-local locking", s.degradations),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockMetricsSnapshot {
    pub acquired_distributed: u64,
    pub acquired_local: u64,
    pub active: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub released: u64,
    pub release_mismatches: u64,
    pub store_errors: u64,
    pub degradations: u64,
}

/// Shared metrics instance.
pub type SharedLockMetrics = Arc<LockMetrics>;
