//! StockGuard Lock Coordinator
//!
//! Named, leased locks shared by every process that talks to the same
//! key-value store.
//!
//! # Guarantees
//!
//! - **Mutual exclusion**: at most one live holder per key while the store
//!   is reachable.
//! - **Bounded hold**: every distributed lock carries a lease, so a crashed
//!   holder blocks others for at most that long.
//! - **Safe release**: release deletes the key only if it still holds the
//!   caller's token.
//!
//! When the store is absent or repeatedly unreachable, acquisition degrades
//! to a process-local lock. Degraded handles report
//! [`LockMode::LocalFallback`] and the degradation is logged at WARN, since
//! other processes are no longer excluded.

pub mod config;
pub mod coordinator;
pub mod handle;
pub mod local_registry;
pub mod metrics;
pub mod store;

pub use config::LockConfig;
pub use coordinator::LockCoordinator;
pub use handle::{LockHandle, LockMode};
pub use local_registry::{LocalGuard, LocalLockRegistry};
pub use metrics::{LockMetrics, LockMetricsSnapshot, SharedLockMetrics};
pub use store::{AtomicStore, MemoryStore, RedisStore, StoreError, StoreResult};
