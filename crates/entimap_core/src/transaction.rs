//! Scoped storage transactions.

use crate::error::CoreResult;
use entimap_storage::Connection;
use tracing::{trace, warn};

/// Holds an open storage transaction.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the
/// transaction back, so every early return and `?` in a write phase leaves
/// storage untouched.
pub struct TransactionGuard<'a> {
    connection: &'a dyn Connection,
    done: bool,
}

impl<'a> TransactionGuard<'a> {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Propagates the connection's begin failure.
    pub fn begin(connection: &'a dyn Connection) -> CoreResult<Self> {
        connection.begin()?;
        trace!("transaction begin");
        Ok(Self {
            connection,
            done: false,
        })
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Propagates the commit failure; the guard then rolls back on drop.
    pub fn commit(mut self) -> CoreResult<()> {
        self.connection.commit()?;
        self.done = true;
        trace!("transaction commit");
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match self.connection.rollback() {
            Ok(()) => trace!("transaction rollback"),
            Err(err) => warn!(error = %err, "transaction rollback failed"),
        }
    }
}

impl std::fmt::Debug for TransactionGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_storage::{Connection, Mapper, MemoryStore, Row, Statement, TableSchema, Value};
    use std::sync::Arc;

    fn create_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_table(TableSchema::new("note"));
        store
    }

    fn note_row(text: &str) -> Row {
        let mut row = Row::new();
        row.insert("text".into(), Value::from(text));
        row
    }

    #[test]
    fn commit_keeps_writes() {
        let store = create_store();
        let guard = TransactionGuard::begin(store.as_ref()).unwrap();
        store.mapper("note").insert(note_row("a")).unwrap();
        guard.commit().unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.rows("note").len(), 1);
    }

    #[test]
    fn drop_rolls_back() {
        let store = create_store();
        {
            let _guard = TransactionGuard::begin(store.as_ref()).unwrap();
            store.mapper("note").insert(note_row("a")).unwrap();
        }

        assert!(!store.in_transaction());
        assert!(store.rows("note").is_empty());
        assert_eq!(store.statements().last(), Some(&Statement::Rollback));
    }
}
