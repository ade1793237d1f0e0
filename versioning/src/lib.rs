//! StockGuard Versioned Updates
//!
//! Lock-free protection for single-record writes. A caller presents the
//! version it read; the update commits only if that version is still current,
//! and the committed version is exactly one higher. Conflicts reload the
//! record and retry within a bounded budget.
//!
//! ```ignore
//! let executor = VersionedUpdateExecutor::default();
//! let outcome = executor
//!     .execute_versioned(&source, Some(&mut sku), |sku| {
//!         sku.stock -= 1;
//!         Ok(true)
//!     })
//!     .await?;
//! ```

pub mod entity;
pub mod executor;
pub mod metrics;
pub mod policy;
pub mod source;

pub use entity::VersionedEntity;
pub use executor::VersionedUpdateExecutor;
pub use metrics::{ExecutorMetrics, ExecutorMetricsSnapshot, SharedExecutorMetrics};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
pub use source::{InMemoryVersionSource, VersionSource};
