//! Retry budget for versioned updates.

use std::time::Duration;

use stockguard_common::constants;

/// How often, and how patiently, a conflicting update is retried.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `retry_delay`: 10ms
/// - `max_delay`: 1 second
/// - `multiplier`: 1.0 (constant delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub retry_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay: constants::DEFAULT_RETRY_DELAY,
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (zero-based).
    ///
    /// `retry_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.multiplier <= 1.0 {
            return self.retry_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.retry_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be a finite value >= 1.0".to_string());
        }
        if self.max_delay < self.retry_delay {
            return Err("max_delay must not be shorter than retry_delay".to_string());
        }
        Ok(())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set the wait before the first retry.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.policy.retry_delay = delay;
        self
    }

    /// Set the cap on any single wait.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_constant_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        for attempt in 0..5 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(10));
        }
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::builder()
            .retry_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(500));
    }

    #[test]
    fn test_sub_millisecond_delays_grow() {
        let policy = RetryPolicy::builder()
            .retry_delay(Duration::from_micros(500))
            .multiplier(2.0)
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_micros(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2));
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let policy = RetryPolicy::builder().multiplier(0.5).build();
        assert!(policy.validate().is_err());
    }
}
