//! Lock coordinator configuration.

use std::time::Duration;

use stockguard_common::constants;

/// Default namespace prepended to every lock key in the store.
pub const DEFAULT_KEY_PREFIX: &str = "distributed_lock:";

/// Lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Prefix for store keys.
    pub key_prefix: String,
    /// Lease used by `acquire_default`.
    pub default_lease: Duration,
    /// Longest lease a caller may request.
    pub max_lease: Duration,
    /// Acquisition timeout used by `acquire_default`.
    pub default_acquire_timeout: Duration,
    /// Interval between set-if-absent attempts.
    pub poll_interval: Duration,
    /// Consecutive connectivity errors before falling back to local locks.
    pub max_store_failures: u32,
    /// Redis connection URL. `None` runs in local-only mode.
    pub redis_url: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_lease: constants::DEFAULT_LEASE,
            max_lease: constants::MAX_LEASE,
            default_acquire_timeout: constants::DEFAULT_ACQUIRE_TIMEOUT,
            poll_interval: constants::POLL_INTERVAL,
            max_store_failures: 3,
            redis_url: None,
        }
    }
}

impl LockConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("STOCKGUARD_REDIS_URL") {
            if !url.is_empty() {
                config.redis_url = Some(url);
            }
        }

        if let Ok(prefix) = std::env::var("STOCKGUARD_LOCK_PREFIX") {
            config.key_prefix = prefix;
        }

        if let Some(lease) = env_millis("STOCKGUARD_LOCK_LEASE_MS") {
            config.default_lease = lease;
        }

        if let Some(timeout) = env_millis("STOCKGUARD_LOCK_TIMEOUT_MS") {
            config.default_acquire_timeout = timeout;
        }

        if let Some(poll) = env_millis("STOCKGUARD_LOCK_POLL_MS") {
            config.poll_interval = poll;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("Poll interval cannot be 0".to_string());
        }

        if self.default_lease.is_zero() {
            return Err("Default lease cannot be 0".to_string());
        }

        if self.default_lease > self.max_lease {
            return Err("Default lease cannot exceed max lease".to_string());
        }

        if self.max_store_failures == 0 {
            return Err("Store failure threshold must be at least 1".to_string());
        }

        Ok(())
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.key_prefix, "distributed_lock:");
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LockConfig::default();
        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = LockConfig::default();
        config.default_lease = config.max_lease + Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
