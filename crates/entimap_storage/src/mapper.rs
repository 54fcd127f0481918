//! Row-level table access contract.

use crate::error::StorageResult;
use crate::query::{Filter, FindOptions};
use crate::row::{Row, RowId};

/// Row-level access to one entity table and the join tables it owns.
///
/// A mapper generates and executes statements; it knows nothing about
/// entities, caching or change tracking. Implementations must report
/// primary and unique key conflicts as
/// [`StorageError::DuplicateEntry`](crate::StorageError::DuplicateEntry).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every method takes `&self`.
pub trait Mapper: Send + Sync {
    /// Returns the name of the table this mapper targets.
    fn table(&self) -> &str;

    /// Reserves the next identity from the table's sequence.
    ///
    /// Reserved identities are never handed out twice, even if the
    /// surrounding transaction rolls back.
    fn next_identity(&self) -> StorageResult<RowId>;

    /// Raises the table's sequence so the next identity is at least `min`.
    ///
    /// Never lowers the sequence.
    fn raise_identity(&self, min: RowId) -> StorageResult<()>;

    /// Loads one row by id.
    fn find(&self, id: RowId) -> StorageResult<Option<Row>>;

    /// Loads several rows by id. Missing ids are skipped; order follows
    /// storage order.
    fn find_by_ids(&self, ids: &[RowId]) -> StorageResult<Vec<Row>>;

    /// Returns the ids of rows matching `filter`, ordered and paged.
    fn find_ids_by(&self, filter: &Filter, options: &FindOptions) -> StorageResult<Vec<RowId>>;

    /// Counts rows matching `filter`.
    fn count_by(&self, filter: &Filter) -> StorageResult<usize>;

    /// Inserts one row and returns its id.
    ///
    /// A row without an id receives the next value of the table sequence.
    fn insert(&self, row: Row) -> StorageResult<RowId>;

    /// Inserts several rows as one multi-row statement and returns their ids
    /// in input order.
    fn batch_insert(&self, rows: Vec<Row>) -> StorageResult<Vec<RowId>>;

    /// Writes the given columns of one row.
    fn update(&self, id: RowId, changes: Row) -> StorageResult<()>;

    /// Deletes one row. Returns `false` if it did not exist.
    fn delete_by_id(&self, id: RowId) -> StorageResult<bool>;

    /// Deletes every row. Returns the number of deleted rows.
    fn delete_all(&self) -> StorageResult<usize>;

    /// Writes a join row into `join_table`.
    fn add_relation(&self, join_table: &str, row: Row) -> StorageResult<()>;

    /// Deletes a join row from `join_table`. Returns `false` if it did not
    /// exist.
    fn remove_relation(&self, join_table: &str, row: &Row) -> StorageResult<bool>;

    /// Loads the join rows of `join_table` matching `filter`.
    fn find_relations(&self, join_table: &str, filter: &Filter) -> StorageResult<Vec<Row>>;
}
