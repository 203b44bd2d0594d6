//! Error types for equivgraph.
//!
//! All errors are strongly typed using thiserror, one enum per layer, so
//! upstream ingestion can decide on retry and backoff by matching on the
//! failing layer. Notification failures are deliberately absent: they are
//! logged by the notifier and never reach a caller.

use std::time::Duration;

use thiserror::Error;

use crate::id::Id;

/// Validation errors that occur before any state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Subject {subject} has source '{publisher}', which is not among the considered sources")]
    SubjectSourceNotConsidered {
        subject: Id,
        publisher: String,
    },

    #[error("Blocked resource ids in assertion: {ids:?}")]
    BlockedResources {
        ids: Vec<Id>,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Failures while acquiring keyed locks.
///
/// Every variant guarantees no key is left held by the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition was cancelled")]
    Cancelled,

    #[error("Lock acquisition timed out after {waited:?}")]
    TimedOut {
        waited: Duration,
    },

    #[error("Could not lock a stable key set after {attempts} attempts")]
    Contended {
        attempts: u32,
    },

    #[error("Key {key} is already held by the calling thread")]
    AlreadyHeld {
        key: String,
    },
}

/// Errors raised by persistence backends (graph tables, entity tables,
/// property graph).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Storage operation '{operation}' exceeded its {timeout:?} deadline")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Top-level error type for equivgraph.
#[derive(Debug, Error)]
pub enum EquivError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

/// Result alias using [`EquivError`].
pub type EquivResult<T> = Result<T, EquivError>;

impl EquivError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a lock acquisition failure.
    #[must_use]
    pub const fn is_lock(&self) -> bool {
        matches!(self, Self::Lock(_))
    }

    /// Returns true if this is a persistence failure.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the whole operation can be retried as-is.
    ///
    /// Lock and persistence failures leave prior state unchanged, so a retry
    /// re-derives the same merge or split. Validation errors will not change
    /// on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Lock(e) => !matches!(e, LockError::AlreadyHeld { .. }),
            Self::Storage(e) => !matches!(e, StorageError::Corrupt(_) | StorageError::Rejected(_)),
            Self::Internal { .. } => false,
        }
    }
}
