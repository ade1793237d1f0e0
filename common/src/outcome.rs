//! Per-call outcome of a lock or versioned-update attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an operation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No entity was supplied or found.
    MissingEntity,
    /// Version check kept failing until the retry budget ran out.
    VersionConflict,
    /// The mutation reported a business failure.
    MutationRejected,
    /// The mutation itself errored.
    MutationFailed,
    /// The caller cancelled while the operation was waiting.
    Interrupted,
    /// A lock could not be obtained.
    LockUnavailable,
    /// Input validation failed before any attempt was made.
    InvalidInput,
}

impl FailureKind {
    /// Stable code for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::MissingEntity => "MISSING_ENTITY",
            FailureKind::VersionConflict => "VERSION_CONFLICT",
            FailureKind::MutationRejected => "MUTATION_REJECTED",
            FailureKind::MutationFailed => "MUTATION_FAILED",
            FailureKind::Interrupted => "INTERRUPTED",
            FailureKind::LockUnavailable => "LOCK_UNAVAILABLE",
            FailureKind::InvalidInput => "INVALID_INPUT",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of a single call. Created fresh per call and owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation took effect.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Retries consumed (attempts beyond the first).
    pub retry_count: u32,
    /// Failure classification, `None` on success.
    pub failure: Option<FailureKind>,
}

impl OperationResult {
    /// A successful outcome.
    pub fn success(message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            success: true,
            message: message.into(),
            retry_count,
            failure: None,
        }
    }

    /// A failed outcome.
    pub fn failure(kind: FailureKind, message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            success: false,
            message: message.into(),
            retry_count,
            failure: Some(kind),
        }
    }

    /// Check whether the failure came from losing a race.
    pub fn is_conflict(&self) -> bool {
        self.failure == Some(FailureKind::VersionConflict)
    }

    /// Check whether the failure was a business rejection.
    pub fn is_rejected(&self) -> bool {
        self.failure == Some(FailureKind::MutationRejected)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure {
            None => write!(f, "ok ({} retries): {}", self.retry_count, self.message),
            Some(kind) => write!(
                f,
                "{} ({} retries): {}",
                kind, self.retry_count, self.message
            ),
        }
    }
}
