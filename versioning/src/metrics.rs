//! Counters for versioned updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    pub commits: AtomicU64,
    pub retries: AtomicU64,
    pub conflicts: AtomicU64,
    pub rejections: AtomicU64,
    pub mutation_failures: AtomicU64,
    pub exhaustions: AtomicU64,
    pub interruptions: AtomicU64,
    pub missing: AtomicU64,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit that needed `retries` retries.
    pub fn committed(&self, retries: u32) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    pub fn conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mutation_failed(&self) {
        self.mutation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exhausted(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupted(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entity_missing(&self) {
        self.missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutorMetricsSnapshot {
        ExecutorMetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows = [
            ("stockguard_versioned_commits", s.commits),
            ("stockguard_versioned_retries", s.retries),
            ("stockguard_versioned_conflicts", s.conflicts),
            ("stockguard_versioned_rejections", s.rejections),
            ("stockguard_versioned_mutation_failures", s.mutation_failures),
            ("stockguard_versioned_exhaustions", s.exhaustions),
            ("stockguard_versioned_interruptions", s.interruptions),
            ("stockguard_versioned_missing", s.missing),
        ];

        let mut out = String::new();
        for (name, value) in rows {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutorMetricsSnapshot {
    pub commits: u64,
    pub retries: u64,
    pub conflicts: u64,
    pub rejections: u64,
    pub mutation_failures: u64,
    pub exhaustions: u64,
    pub interruptions: u64,
    pub missing: u64,
}

pub type SharedExecutorMetrics = Arc<ExecutorMetrics>;
