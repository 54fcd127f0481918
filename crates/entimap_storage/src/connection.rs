//! Transaction boundary contract.

use crate::error::StorageResult;

/// Transaction control shared by all mappers of one store.
///
/// Transactions are flat: `begin` while a transaction is open fails with
/// [`StorageError::Transaction`](crate::StorageError::Transaction).
pub trait Connection: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> StorageResult<()>;

    /// Commits the open transaction.
    fn commit(&self) -> StorageResult<()>;

    /// Discards every write since `begin`.
    fn rollback(&self) -> StorageResult<()>;

    /// Enables or disables foreign key enforcement.
    ///
    /// While disabled, rows may reference missing parents and deletes do not
    /// cascade.
    fn set_foreign_key_checks(&self, enabled: bool) -> StorageResult<()>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;
}
