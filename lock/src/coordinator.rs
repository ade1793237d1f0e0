//! Leased, token-protected lock coordination.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use stockguard_common::{
    CancelSignal, Deadline, LockKey, LockToken, Result, StockGuardError,
};

use crate::config::LockConfig;
use crate::handle::LockHandle;
use crate::local_registry::{LocalGuard, LocalLockRegistry};
use crate::metrics::{LockMetrics, SharedLockMetrics};
use crate::store::{AtomicStore, RedisStore, StoreError};

/// Shortest lease the store can express.
const MIN_LEASE: Duration = Duration::from_millis(1);

/// Acquires and releases named locks against an [`AtomicStore`], falling
/// back to a [`LocalLockRegistry`] when the store is absent or unreachable.
///
/// Safe to share across tasks. No background tasks are spawned; every wait
/// happens inside the caller's future.
pub struct LockCoordinator {
    /// Shared lock authority. `None` runs in local-only mode.
    store: Option<Arc<dyn AtomicStore>>,
    /// Process-local fallback.
    local: LocalLockRegistry,
    /// Configuration.
    config: LockConfig,
    /// Metrics.
    metrics: SharedLockMetrics,
}

impl LockCoordinator {
    /// Create a coordinator backed by `store`.
    pub fn new(store: Arc<dyn AtomicStore>, config: LockConfig) -> Self {
        Self::with_store(Some(store), config)
    }

    /// Create a coordinator with no store. Every lock is process-local.
    pub fn local_only(config: LockConfig) -> Self {
        Self::with_store(None, config)
    }

    /// Create a coordinator with an optional store.
    pub fn with_store(store: Option<Arc<dyn AtomicStore>>, config: LockConfig) -> Self {
        Self {
            store,
            local: LocalLockRegistry::new(),
            config,
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    /// Build a coordinator from configuration, connecting to `Redis` when a
    /// URL is configured. An unreachable server leaves the coordinator in
    /// local-only mode.
    pub async fn from_config(config: LockConfig) -> Self {
        let store: Option<Arc<dyn AtomicStore>> = match &config.redis_url {
            Some(url) => match RedisStore::connect(url).await {
                Ok(store) => {
                    info!("Lock store connected");
                    Some(Arc::new(store))
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "Lock store unreachable at startup, locks are process-local only"
                    );
                    None
                }
            },
            None => None,
        };

        Self::with_store(store, config)
    }

    /// Configuration in use.
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Metrics handle.
    pub fn metrics(&self) -> SharedLockMetrics {
        self.metrics.clone()
    }

    /// Local fallback registry.
    pub fn local_registry(&self) -> &LocalLockRegistry {
        &self.local
    }

    /// Check if a shared store is configured.
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Acquire `key` with the configured default lease and timeout.
    pub async fn acquire_default(&self, key: &str) -> Result<LockHandle> {
        self.acquire_lock(
            key,
            self.config.default_lease,
            self.config.default_acquire_timeout,
        )
        .await
    }

    /// Acquire `key`, holding it for at most `lease`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`StockGuardError::AcquisitionTimeout`] when the key stays held past
    /// `timeout`; [`StockGuardError::InvalidArgument`] for a malformed key or
    /// lease; [`StockGuardError::StoreCommand`] if the store rejects the
    /// command.
    pub async fn acquire_lock(
        &self,
        key: &str,
        lease: Duration,
        timeout: Duration,
    ) -> Result<LockHandle> {
        self.acquire_lock_with_cancel(key, lease, timeout, &CancelSignal::never())
            .await
    }

    /// [`acquire_lock`](Self::acquire_lock) that gives up early with
    /// [`StockGuardError::Cancelled`] once `cancel` fires.
    #[instrument(skip(self, cancel), fields(lock_key = %key))]
    pub async fn acquire_lock_with_cancel(
        &self,
        key: &str,
        lease: Duration,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<LockHandle> {
        let lock_key = LockKey::new(key);
        if !lock_key.is_valid() {
            return Err(StockGuardError::invalid_field(
                "key",
                format!("invalid lock key {key:?}"),
            ));
        }
        if lease < MIN_LEASE || lease > self.config.max_lease {
            return Err(StockGuardError::invalid_field(
                "lease",
                format!(
                    "lease must be between 1ms and {}ms",
                    self.config.max_lease.as_millis()
                ),
            ));
        }

        let deadline = Deadline::after(timeout);

        let Some(store) = &self.store else {
            warn!(
                lock_key = %key,
                "No lock store configured, falling back to process-local lock"
            );
            self.metrics.degraded();
            let guard = self.wait_local(key, &deadline, cancel).await?;
            return Ok(self.hold_local(key, guard));
        };

        // In-process callers queue on the local mutex first. The guard stays
        // with the handle in both modes, so a holder in this process keeps
        // excluding local callers after the store goes away.
        let guard = self.wait_local(key, &deadline, cancel).await?;

        let store_key = lock_key.namespaced(&self.config.key_prefix);
        let token = LockToken::generate();
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                self.metrics.cancelled();
                return Err(StockGuardError::Cancelled(key.to_string()));
            }

            match store.set_if_absent(&store_key, token.as_str(), lease).await {
                Ok(true) => {
                    self.metrics.distributed_acquired();
                    debug!(
                        lock_key = %key,
                        waited_ms = deadline.elapsed_ms(),
                        lease_ms = lease.as_millis() as u64,
                        "Lock acquired"
                    );
                    return Ok(LockHandle::distributed(
                        key.to_string(),
                        store_key,
                        token,
                        lease,
                        guard,
                    ));
                }
                Ok(false) => {
                    consecutive_failures = 0;
                }
                Err(err) if err.is_connectivity() => {
                    consecutive_failures += 1;
                    self.metrics.store_error();
                    warn!(
                        lock_key = %key,
                        error = %err,
                        consecutive_failures,
                        "Lock store unreachable during acquire"
                    );

                    if consecutive_failures >= self.config.max_store_failures {
                        self.log_degradation(key, &err);
                        self.metrics.degraded();
                        return Ok(self.hold_local(key, guard));
                    }
                }
                Err(err) => {
                    error!(lock_key = %key, error = %err, "Lock store rejected acquire");
                    return Err(err.into());
                }
            }

            if deadline.is_exceeded() {
                if consecutive_failures > 0 {
                    // The store was failing at the deadline; keep the local lock.
                    self.log_degradation(
                        key,
                        &StoreError::Unavailable("unreachable at deadline".to_string()),
                    );
                    self.metrics.degraded();
                    return Ok(self.hold_local(key, guard));
                }

                self.metrics.timeout();
                let waited_ms = deadline.elapsed_ms();
                debug!(lock_key = %key, waited_ms, "Lock acquisition timed out");
                return Err(StockGuardError::AcquisitionTimeout {
                    key: key.to_string(),
                    waited_ms,
                });
            }

            let pause = self.config.poll_interval.min(deadline.remaining());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.metrics.cancelled();
                    return Err(StockGuardError::Cancelled(key.to_string()));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Release a lock. Returns `Ok(false)` when the store no longer holds this
    /// handle's token (lease expired, possibly re-acquired by someone else);
    /// nothing is deleted in that case.
    ///
    /// # Errors
    ///
    /// [`StockGuardError::StoreUnavailable`] if the store cannot be reached;
    /// the lock then lapses when its lease runs out.
    #[instrument(skip(self, handle), fields(lock_key = %handle.key(), mode = %handle.mode()))]
    pub async fn release_lock(&self, mut handle: LockHandle) -> Result<bool> {
        if handle.is_degraded() {
            drop(handle.take_local_guard());
            self.metrics.lock_returned(true);
            debug!(lock_key = %handle.key(), "Local lock released");
            return Ok(true);
        }

        // The local guard drops with `handle` on every path out of here.
        let released = self
            .compare_and_delete(handle.key(), handle.store_key(), handle.token())
            .await?;
        self.metrics.lock_returned(released);
        Ok(released)
    }

    /// Release `key` only if `token` still owns it.
    pub async fn release_token(&self, key: &str, token: &LockToken) -> Result<bool> {
        let store_key = LockKey::new(key).namespaced(&self.config.key_prefix);
        let released = self.compare_and_delete(key, &store_key, token).await?;
        self.metrics.lock_returned(released);
        Ok(released)
    }

    /// Run `f` while holding `key`. The lock is released afterwards whatever
    /// `f` returns; a failed release is logged and left to lease expiry.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        lease: Duration,
        timeout: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire_lock(key, lease, timeout).await?;
        let output = f().await;

        if let Err(err) = self.release_lock(handle).await {
            warn!(
                lock_key = %key,
                error = %err,
                "Release failed, lock will lapse at lease expiry"
            );
        }

        Ok(output)
    }

    /// Wait for the process-local lock on `key` until `deadline`.
    async fn wait_local(
        &self,
        key: &str,
        deadline: &Deadline,
        cancel: &CancelSignal,
    ) -> Result<LocalGuard> {
        match self.local.acquire(key, deadline.remaining(), cancel).await {
            Ok(Some(guard)) => Ok(guard),
            Ok(None) => {
                self.metrics.timeout();
                Err(StockGuardError::AcquisitionTimeout {
                    key: key.to_string(),
                    waited_ms: deadline.elapsed_ms(),
                })
            }
            Err(err) => {
                if matches!(err, StockGuardError::Cancelled(_)) {
                    self.metrics.cancelled();
                }
                Err(err)
            }
        }
    }

    fn hold_local(&self, key: &str, guard: LocalGuard) -> LockHandle {
        self.metrics.local_acquired();
        warn!(
            lock_key = %key,
            "Holding process-local lock, other instances are NOT excluded"
        );
        LockHandle::local(key.to_string(), guard)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        store_key: &str,
        token: &LockToken,
    ) -> Result<bool> {
        let Some(store) = &self.store else {
            warn!(lock_key = %key, "No lock store configured, nothing to release");
            return Ok(false);
        };

        match store.compare_and_delete(store_key, token.as_str()).await {
            Ok(true) => {
                debug!(lock_key = %key, "Lock released");
                Ok(true)
            }
            Ok(false) => {
                warn!(
                    lock_key = %key,
                    "Release skipped, lock expired or is held by another owner"
                );
                Ok(false)
            }
            Err(err) => {
                if err.is_connectivity() {
                    self.metrics.store_error();
                }
                error!(lock_key = %key, error = %err, "Lock release failed");
                Err(err.into())
            }
        }
    }

    fn log_degradation(&self, key: &str, cause: &StoreError) {
        warn!(
            lock_key = %key,
            cause = %cause,
            "Lock store unavailable, degrading to process-local lock; cross-process exclusion lost"
        );
    }
}
