//! Error types for the StockGuard concurrency layer.

use thiserror::Error;

/// Main error type for lock and versioned-update operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockGuardError {
    /// Lock was not obtained within the caller's timeout.
    #[error("Lock acquisition timed out for {key} after {waited_ms}ms")]
    AcquisitionTimeout { key: String, waited_ms: u64 },

    /// Caller cancelled while waiting for a lock.
    #[error("Lock acquisition cancelled for {0}")]
    Cancelled(String),

    /// Optimistic version check failed.
    #[error("Version conflict on {entity}: expected {expected}, current {current}")]
    VersionConflict {
        entity: String,
        expected: u64,
        current: u64,
    },

    /// Caller's mutation reported a business failure.
    #[error("Mutation rejected: {0}")]
    MutationRejected(String),

    /// Atomic store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Atomic store was reachable but rejected the command.
    #[error("Store command failed: {0}")]
    StoreCommand(String),

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Versioned record not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl StockGuardError {
    /// Shorthand for an invalid argument tied to a field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        StockGuardError::InvalidArgument {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Check if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StockGuardError::AcquisitionTimeout { .. }
                | StockGuardError::VersionConflict { .. }
                | StockGuardError::StoreUnavailable(_)
        )
    }

    /// Check if the error came from losing a race rather than bad input.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StockGuardError::AcquisitionTimeout { .. } | StockGuardError::VersionConflict { .. }
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StockGuardError::AcquisitionTimeout { .. } => Some(100),
            StockGuardError::VersionConflict { .. } => Some(10),
            StockGuardError::StoreUnavailable(_) => Some(500),
            _ => None,
        }
    }

    /// Stable error code for callers that map errors to responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StockGuardError::AcquisitionTimeout { .. } => "ACQUISITION_TIMEOUT",
            StockGuardError::Cancelled(_) => "CANCELLED",
            StockGuardError::VersionConflict { .. } => "VERSION_CONFLICT",
            StockGuardError::MutationRejected(_) => "MUTATION_REJECTED",
            StockGuardError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            StockGuardError::StoreCommand(_) => "STORE_COMMAND",
            StockGuardError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            StockGuardError::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            StockGuardError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            StockGuardError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for StockGuard operations.
pub type Result<T> = std::result::Result<T, StockGuardError>;
