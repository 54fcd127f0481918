//! Error types for entimap core.

use entimap_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entimap core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Storage layer error, including duplicate key conflicts.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A mutation was attempted while a flush is in progress.
    #[error("entity manager is locked: {operation} is not allowed during flush")]
    LockViolation {
        /// The rejected operation.
        operation: &'static str,
    },

    /// An argument was rejected; indicates a programming error.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a lock violation error.
    pub fn lock_violation(operation: &'static str) -> Self {
        Self::LockViolation { operation }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns `true` if the storage rejected a row because of a primary or
    /// unique key conflict.
    #[must_use]
    pub fn is_duplicate_entry(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_duplicate_entry())
    }

    /// Returns `true` for lock violations.
    #[must_use]
    pub fn is_lock_violation(&self) -> bool {
        matches!(self, Self::LockViolation { .. })
    }
}
