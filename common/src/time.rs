//! Time utilities and default timings.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Default timings shared by the lock and versioning crates.
pub mod constants {
    use std::time::Duration;

    /// Default lock lease (30 seconds).
    pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

    /// Longest lease a caller may request (5 minutes).
    pub const MAX_LEASE: Duration = Duration::from_secs(300);

    /// Default lock acquisition timeout (5 seconds).
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Interval between set-if-absent attempts while a key is held (50ms).
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Default optimistic retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default wait between optimistic retries (10ms).
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);
}

/// A wall-clock timestamp, always UTC. Used for audit records.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Longest wait a [`Deadline`] represents (30 years).
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A monotonic deadline for bounded waits.
///
/// Built on `tokio::time::Instant` so paused-clock tests drive it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now. Budgets longer than [`FAR_FUTURE`], such as
    /// `Duration::MAX`, are clamped to it.
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        let at = started
            .checked_add(budget.min(FAR_FUTURE))
            .unwrap_or(started);
        Self { started, at }
    }

    /// Check if the deadline has passed.
    pub fn is_exceeded(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left before the deadline, zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Time spent since the deadline was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
