//! Order accounting for a simulation run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use stockguard_common::{FailureKind, OperationResult};
use stockguard_lock::LockMetricsSnapshot;

/// Upper bounds of the latency buckets in ms. One more bucket catches the rest.
const LATENCY_BOUNDS_MS: [u64; 6] = [1, 5, 25, 100, 500, 2_500];

/// Tally of placed orders.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationMetrics {
    pub orders: u64,
    /// Orders that took stock.
    pub sold: u64,
    pub units_sold: u64,
    /// Orders turned away for insufficient stock.
    pub out_of_stock: u64,
    /// Every other failure, keyed by failure code.
    pub failures: BTreeMap<&'static str, u64>,
    /// Version conflicts retried across all orders.
    pub retries: u64,
    /// Most retries a single order needed.
    pub max_retries: u32,
    latency_buckets: [u64; LATENCY_BOUNDS_MS.len() + 1],
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one deduction of `quantity` units that ended with `outcome`.
    pub fn record(&mut self, quantity: u32, outcome: &OperationResult, latency: Duration) {
        self.retries += u64::from(outcome.retry_count);
        self.max_retries = self.max_retries.max(outcome.retry_count);

        if outcome.success {
            self.sold += 1;
            self.units_sold += u64::from(quantity);
        } else {
            match outcome.failure {
                Some(FailureKind::MutationRejected) => self.out_of_stock += 1,
                Some(kind) => *self.failures.entry(kind.code()).or_default() += 1,
                None => *self.failures.entry("UNKNOWN").or_default() += 1,
            }
        }

        self.count(latency);
    }

    /// Count an order whose call returned an error.
    pub fn record_error(&mut self, code: &'static str, latency: Duration) {
        *self.failures.entry(code).or_default() += 1;
        self.count(latency);
    }

    fn count(&mut self, latency: Duration) {
        self.orders += 1;
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let bucket = LATENCY_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BOUNDS_MS.len());
        self.latency_buckets[bucket] += 1;
    }

    /// Orders that neither sold nor ran out of stock.
    pub fn failed(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn retries_per_order(&self) -> f64 {
        if self.orders == 0 {
            return 0.0;
        }
        self.retries as f64 / self.orders as f64
    }

    /// Non-empty latency buckets as `(label, orders)`.
    pub fn latency_histogram(&self) -> Vec<(String, u64)> {
        self.latency_buckets
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, count)| {
                let label = match LATENCY_BOUNDS_MS.get(i) {
                    Some(bound) => format!("<={bound}ms"),
                    None => format!(">{}ms", LATENCY_BOUNDS_MS[LATENCY_BOUNDS_MS.len() - 1]),
                };
                (label, *count)
            })
            .collect()
    }
}

/// Share of acquisitions that only held a process-local lock.
pub fn degraded_share(locks: &LockMetricsSnapshot) -> f64 {
    let total = locks.acquired_distributed + locks.acquired_local;
    if total == 0 {
        return 0.0;
    }
    locks.acquired_local as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_classified() {
        let mut metrics = SimulationMetrics::new();

        metrics.record(2, &OperationResult::success("ok", 0), Duration::from_millis(3));
        metrics.record(1, &OperationResult::success("ok", 2), Duration::from_millis(40));
        metrics.record(
            5,
            &OperationResult::failure(FailureKind::MutationRejected, "insufficient stock", 0),
            Duration::from_millis(2),
        );
        metrics.record(
            1,
            &OperationResult::failure(FailureKind::VersionConflict, "conflict", 3),
            Duration::from_secs(3),
        );
        metrics.record_error("STORE_COMMAND", Duration::ZERO);

        assert_eq!(metrics.orders, 5);
        assert_eq!(metrics.sold, 2);
        assert_eq!(metrics.units_sold, 3);
        assert_eq!(metrics.out_of_stock, 1);
        assert_eq!(metrics.failed(), 2);
        assert_eq!(metrics.max_retries, 3);
        assert_eq!(metrics.retries_per_order(), 1.0);
        assert_eq!(
            metrics.latency_histogram(),
            vec![
                ("<=1ms".to_string(), 1),
                ("<=5ms".to_string(), 2),
                ("<=100ms".to_string(), 1),
                (">2500ms".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_degraded_share() {
        let mut locks = LockMetricsSnapshot::default();
        assert_eq!(degraded_share(&locks), 0.0);

        locks.acquired_distributed = 3;
        locks.acquired_local = 1;
        assert_eq!(degraded_share(&locks), 0.25);
    }
}
