//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// A unique or primary key conflict is reported as
/// [`StorageError::DuplicateEntry`] so callers can tell it apart from every
/// other storage failure and implement upsert or retry logic on top.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A primary or unique key conflict.
    #[error("duplicate entry for key {key} in table {table}")]
    DuplicateEntry {
        /// Table that rejected the row.
        table: String,
        /// Name of the violated key (`PRIMARY` or the unique column).
        key: String,
        /// Text of the failing statement, when available.
        statement: Option<String>,
    },

    /// A foreign key constraint was violated.
    #[error("foreign key violation on {table}.{column}: {message}")]
    ForeignKey {
        /// Table holding the constrained column.
        table: String,
        /// The constrained column.
        column: String,
        /// Description of the violation.
        message: String,
    },

    /// Any other failure while executing a statement.
    #[error("statement failed: {message}")]
    Statement {
        /// Description of the failure.
        message: String,
        /// Text of the failing statement, when available.
        statement: Option<String>,
    },

    /// Transaction control was used out of order.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The referenced table does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The storage has been closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a generic statement failure.
    pub fn statement(message: impl Into<String>, statement: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            statement,
        }
    }

    /// Creates a duplicate entry failure.
    pub fn duplicate_entry(
        table: impl Into<String>,
        key: impl Into<String>,
        statement: Option<String>,
    ) -> Self {
        Self::DuplicateEntry {
            table: table.into(),
            key: key.into(),
            statement,
        }
    }

    /// Returns `true` for primary/unique key conflicts.
    #[must_use]
    pub fn is_duplicate_entry(&self) -> bool {
        matches!(self, Self::DuplicateEntry { .. })
    }

    /// Returns the failing statement text, if the error carries one.
    #[must_use]
    pub fn statement_text(&self) -> Option<&str> {
        match self {
            Self::DuplicateEntry { statement, .. } | Self::Statement { statement, .. } => {
                statement.as_deref()
            }
            _ => None,
        }
    }

    /// Attaches statement text to errors that can carry it.
    #[must_use]
    pub fn with_statement(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::DuplicateEntry { statement, .. } | Self::Statement { statement, .. } => {
                if statement.is_none() {
                    *statement = Some(text.into());
                }
            }
            _ => {}
        }
        self
    }
}
