//! In-memory relational store.

use crate::connection::Connection;
use crate::error::{StorageError, StorageResult};
use crate::mapper::Mapper;
use crate::query::{compare_values, Filter, FindOptions, SortOrder};
use crate::row::{row_id, Row, RowId, Value, ID_COLUMN};
use crate::statement::Statement;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// What happens to referencing rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnDelete {
    /// Reject the delete.
    #[default]
    Restrict,
    /// Delete the referencing rows too.
    Cascade,
}

/// A foreign key from a column to the id of another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub references: String,
    /// Delete behavior.
    pub on_delete: OnDelete,
}

/// Declaration of a table.
///
/// Entity tables are keyed by the `id` column. Join tables have no id; each
/// distinct row is its own primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    unique: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    join: bool,
}

impl TableSchema {
    /// Declares an entity table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
            join: false,
        }
    }

    /// Declares a join table.
    #[must_use]
    pub fn join(name: impl Into<String>) -> Self {
        Self {
            join: true,
            ..Self::new(name)
        }
    }

    /// Adds a unique constraint on a column. Null values never conflict.
    #[must_use]
    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn references(
        mut self,
        column: impl Into<String>,
        table: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            references: table.into(),
            on_delete,
        });
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for join tables.
    #[must_use]
    pub fn is_join(&self) -> bool {
        self.join
    }

    /// Returns the foreign keys.
    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<RowId, Row>,
    links: Vec<Row>,
}

type Tables = BTreeMap<String, Table>;

struct Fault {
    matches: Box<dyn Fn(&Statement) -> bool + Send + Sync>,
    error: StorageError,
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault").field("error", &self.error).finish()
    }
}

#[derive(Debug)]
struct State {
    schemas: BTreeMap<String, TableSchema>,
    tables: Tables,
    snapshot: Option<Tables>,
    sequences: BTreeMap<String, RowId>,
    foreign_key_checks: bool,
    min_identity: RowId,
    closed: bool,
}

/// Working view of the store for one write statement.
///
/// Writes go to a copy of the tables that replaces the live tables only
/// when the whole statement succeeds, so a failing multi-row statement
/// leaves nothing behind.
struct Work<'a> {
    schemas: &'a BTreeMap<String, TableSchema>,
    tables: Tables,
    sequences: &'a mut BTreeMap<String, RowId>,
    foreign_key_checks: bool,
    min_identity: RowId,
}

impl Work<'_> {
    fn schema(&self, table: &str) -> StorageResult<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    fn entity_schema(&self, table: &str) -> StorageResult<TableSchema> {
        let schema = self.schema(table)?;
        if schema.join {
            return Err(StorageError::statement(
                format!("{table} is a join table"),
                None,
            ));
        }
        Ok(schema.clone())
    }

    fn join_schema(&self, table: &str) -> StorageResult<TableSchema> {
        let schema = self.schema(table)?;
        if !schema.join {
            return Err(StorageError::statement(
                format!("{table} is not a join table"),
                None,
            ));
        }
        Ok(schema.clone())
    }

    fn table_mut(&mut self, table: &str) -> &mut Table {
        self.tables.entry(table.to_string()).or_default()
    }

    fn advance_sequence(&mut self, table: &str) -> RowId {
        let max_existing = self
            .tables
            .get(table)
            .and_then(|t| t.rows.keys().next_back().copied())
            .unwrap_or(0);
        let current = self.sequences.entry(table.to_string()).or_insert(0);
        let next = (*current + 1)
            .max(self.min_identity)
            .max(max_existing + 1);
        *current = next;
        next
    }

    fn bump_sequence(&mut self, table: &str, id: RowId) {
        let current = self.sequences.entry(table.to_string()).or_insert(0);
        if id > *current {
            *current = id;
        }
    }

    fn check_references(&self, schema: &TableSchema, row: &Row) -> StorageResult<()> {
        if !self.foreign_key_checks {
            return Ok(());
        }
        for fk in &schema.foreign_keys {
            let Some(value) = row.get(&fk.column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let exists = value
                .as_u64()
                .and_then(|id| self.tables.get(&fk.references).map(|t| t.rows.contains_key(&id)))
                .unwrap_or(false);
            if !exists {
                return Err(StorageError::ForeignKey {
                    table: schema.name.clone(),
                    column: fk.column.clone(),
                    message: format!("no row {value} in {}", fk.references),
                });
            }
        }
        Ok(())
    }

    fn check_unique(&self, schema: &TableSchema, id: RowId, row: &Row) -> StorageResult<()> {
        let Some(table) = self.tables.get(&schema.name) else {
            return Ok(());
        };
        for column in &schema.unique {
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let conflict = table
                .rows
                .iter()
                .any(|(other, existing)| *other != id && existing.get(column) == Some(value));
            if conflict {
                return Err(StorageError::duplicate_entry(&schema.name, column, None));
            }
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, mut row: Row) -> StorageResult<RowId> {
        let schema = self.entity_schema(table)?;
        let id = match row_id(&row) {
            Some(id) => {
                if self.tables.get(table).is_some_and(|t| t.rows.contains_key(&id)) {
                    return Err(StorageError::duplicate_entry(table, "PRIMARY", None));
                }
                self.bump_sequence(table, id);
                id
            }
            None => {
                let id = self.advance_sequence(table);
                row.insert(ID_COLUMN.to_string(), Value::from(id));
                id
            }
        };
        self.check_unique(&schema, id, &row)?;
        self.check_references(&schema, &row)?;
        self.table_mut(table).rows.insert(id, row);
        Ok(id)
    }

    fn update(&mut self, table: &str, id: RowId, changes: Row) -> StorageResult<()> {
        let schema = self.entity_schema(table)?;
        if let Some(new_id) = changes.get(ID_COLUMN) {
            if new_id.as_u64() != Some(id) {
                return Err(StorageError::statement("cannot change row id", None));
            }
        }
        let Some(current) = self.tables.get(table).and_then(|t| t.rows.get(&id)) else {
            return Err(StorageError::statement(format!("no row {id} in {table}"), None));
        };
        let mut updated = current.clone();
        updated.extend(changes.clone());
        self.check_unique(&schema, id, &updated)?;
        self.check_references(&schema, &changes)?;
        self.table_mut(table).rows.insert(id, updated);
        Ok(())
    }

    fn dependents(&self, table: &str) -> Vec<(TableSchema, ForeignKey)> {
        self.schemas
            .values()
            .flat_map(|schema| {
                schema
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.references == table)
                    .map(move |fk| (schema.clone(), fk.clone()))
            })
            .collect()
    }

    fn delete(&mut self, table: &str, id: RowId) -> StorageResult<bool> {
        self.entity_schema(table)?;
        let existed = self
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.remove(&id))
            .is_some();
        if !existed || !self.foreign_key_checks {
            return Ok(existed);
        }

        let target = Value::from(id);
        for (schema, fk) in self.dependents(table) {
            let referencing = |row: &Row| row.get(&fk.column) == Some(&target);
            let Some(dependent) = self.tables.get(&schema.name) else {
                continue;
            };
            let child_ids: Vec<RowId> = dependent
                .rows
                .iter()
                .filter(|(_, row)| referencing(*row))
                .map(|(child, _)| *child)
                .collect();
            let has_links = dependent.links.iter().any(|row| referencing(row));
            if child_ids.is_empty() && !has_links {
                continue;
            }
            if fk.on_delete == OnDelete::Restrict {
                return Err(StorageError::ForeignKey {
                    table: schema.name.clone(),
                    column: fk.column.clone(),
                    message: format!("row {id} of {table} is still referenced"),
                });
            }
            self.table_mut(&schema.name).links.retain(|row| !referencing(row));
            for child in child_ids {
                self.delete(&schema.name, child)?;
            }
        }
        Ok(true)
    }

    fn add_link(&mut self, table: &str, row: Row) -> StorageResult<()> {
        let schema = self.join_schema(table)?;
        if self.tables.get(table).is_some_and(|t| t.links.contains(&row)) {
            return Err(StorageError::duplicate_entry(table, "PRIMARY", None));
        }
        self.check_references(&schema, &row)?;
        self.table_mut(table).links.push(row);
        Ok(())
    }

    fn remove_link(&mut self, table: &str, row: &Row) -> StorageResult<bool> {
        self.join_schema(table)?;
        let links = &mut self.table_mut(table).links;
        let before = links.len();
        links.retain(|existing| existing != row);
        Ok(links.len() != before)
    }
}

/// An in-memory relational store.
///
/// Supports what the persistence layer needs from a SQL database: per-table
/// sequences, primary and unique keys, foreign keys with restrict or cascade
/// deletes, join tables, flat transactions and a switch for foreign key
/// enforcement. Every executed statement is appended to a log.
///
/// Writes outside a transaction apply immediately. Sequences are not
/// transactional: identities reserved inside a rolled back transaction are
/// never reused.
///
/// # Failure Injection
///
/// [`MemoryStore::fail_on`] registers a one-shot failure for the next
/// statement matching a predicate, which lets tests exercise rollback paths.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    log: Mutex<Vec<Statement>>,
    faults: Mutex<Vec<Fault>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_min_identity(1)
    }

    /// Creates an empty store whose sequences start at `min_identity`.
    #[must_use]
    pub fn with_min_identity(min_identity: RowId) -> Self {
        Self {
            state: RwLock::new(State {
                schemas: BTreeMap::new(),
                tables: Tables::new(),
                snapshot: None,
                sequences: BTreeMap::new(),
                foreign_key_checks: true,
                min_identity: min_identity.max(1),
                closed: false,
            }),
            log: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Declares a table. Redeclaring a table replaces its schema and keeps
    /// its rows.
    pub fn create_table(&self, schema: TableSchema) {
        let mut state = self.state.write();
        debug!(table = %schema.name, join = schema.join, "create table");
        state.tables.entry(schema.name.clone()).or_default();
        state.schemas.insert(schema.name.clone(), schema);
    }

    /// Returns `true` if the table has been declared.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.state.read().schemas.contains_key(table)
    }

    /// Returns a mapper for one table of this store.
    #[must_use]
    pub fn mapper(self: &Arc<Self>, table: impl Into<String>) -> TableMapper {
        TableMapper {
            store: Arc::clone(self),
            table: table.into(),
        }
    }

    /// Returns every row of an entity table, ordered by id.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns one row of an entity table.
    #[must_use]
    pub fn row(&self, table: &str, id: RowId) -> Option<Row> {
        self.state
            .read()
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&id).cloned())
    }

    /// Returns every row of a join table, in insertion order.
    #[must_use]
    pub fn links(&self, table: &str) -> Vec<Row> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.links.clone())
            .unwrap_or_default()
    }

    /// Returns the statement log.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    /// Returns the logged statements that modified rows.
    #[must_use]
    pub fn writes(&self) -> Vec<Statement> {
        self.log
            .lock()
            .iter()
            .filter(|s| s.is_write())
            .cloned()
            .collect()
    }

    /// Clears the statement log.
    pub fn clear_statements(&self) {
        self.log.lock().clear();
    }

    /// Returns whether foreign keys are currently enforced.
    #[must_use]
    pub fn foreign_key_checks(&self) -> bool {
        self.state.read().foreign_key_checks
    }

    /// Makes the next statement matching `predicate` fail with `error`.
    ///
    /// Each registration fires once.
    pub fn fail_on<F>(&self, predicate: F, error: StorageError)
    where
        F: Fn(&Statement) -> bool + Send + Sync + 'static,
    {
        self.faults.lock().push(Fault {
            matches: Box::new(predicate),
            error,
        });
    }

    /// Closes the store. Every later statement fails with
    /// [`StorageError::Closed`].
    pub fn close(&self) {
        self.state.write().closed = true;
    }

    fn take_fault(&self, statement: &Statement) -> StorageResult<()> {
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|f| (f.matches)(statement)) {
            let fault = faults.remove(pos);
            debug!(statement = %statement, "injected failure");
            return Err(fault.error.with_statement(statement.to_string()));
        }
        Ok(())
    }

    fn record(&self, statement: Statement) {
        trace!(statement = %statement, "executed");
        self.log.lock().push(statement);
    }

    /// Runs a write statement against a working copy of the tables.
    fn write<T>(
        &self,
        statement: Statement,
        apply: impl FnOnce(&mut Work<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.take_fault(&statement)?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.closed {
            return Err(StorageError::Closed);
        }
        let mut work = Work {
            schemas: &state.schemas,
            tables: state.tables.clone(),
            sequences: &mut state.sequences,
            foreign_key_checks: state.foreign_key_checks,
            min_identity: state.min_identity,
        };
        let value = apply(&mut work).map_err(|e| e.with_statement(statement.to_string()))?;
        state.tables = work.tables;
        drop(guard);
        self.record(statement);
        Ok(value)
    }

    /// Runs a read statement.
    fn read<T>(
        &self,
        statement: Statement,
        apply: impl FnOnce(&Tables) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.take_fault(&statement)?;
        let state = self.state.read();
        if state.closed {
            return Err(StorageError::Closed);
        }
        let value = apply(&state.tables)?;
        drop(state);
        self.record(statement);
        Ok(value)
    }

    /// Runs a transaction control statement.
    fn control(
        &self,
        statement: Statement,
        apply: impl FnOnce(&mut State) -> StorageResult<()>,
    ) -> StorageResult<()> {
        self.take_fault(&statement)?;
        let mut state = self.state.write();
        if state.closed {
            return Err(StorageError::Closed);
        }
        apply(&mut state)?;
        drop(state);
        self.record(statement);
        Ok(())
    }
}

impl Connection for MemoryStore {
    fn begin(&self) -> StorageResult<()> {
        self.control(Statement::Begin, |state| {
            if state.snapshot.is_some() {
                return Err(StorageError::Transaction(
                    "transaction already open".to_string(),
                ));
            }
            state.snapshot = Some(state.tables.clone());
            Ok(())
        })
    }

    fn commit(&self) -> StorageResult<()> {
        self.control(Statement::Commit, |state| {
            state
                .snapshot
                .take()
                .map(|_| ())
                .ok_or_else(|| StorageError::Transaction("no open transaction".to_string()))
        })
    }

    fn rollback(&self) -> StorageResult<()> {
        self.control(Statement::Rollback, |state| {
            let snapshot = state
                .snapshot
                .take()
                .ok_or_else(|| StorageError::Transaction("no open transaction".to_string()))?;
            state.tables = snapshot;
            Ok(())
        })
    }

    fn set_foreign_key_checks(&self, enabled: bool) -> StorageResult<()> {
        self.control(Statement::SetForeignKeyChecks(enabled), |state| {
            state.foreign_key_checks = enabled;
            Ok(())
        })
    }

    fn in_transaction(&self) -> bool {
        self.state.read().snapshot.is_some()
    }
}

/// [`Mapper`] over one table of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct TableMapper {
    store: Arc<MemoryStore>,
    table: String,
}

impl TableMapper {
    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn rows_of<'t>(&self, tables: &'t Tables) -> StorageResult<&'t BTreeMap<RowId, Row>> {
        tables
            .get(&self.table)
            .map(|t| &t.rows)
            .ok_or_else(|| StorageError::UnknownTable(self.table.clone()))
    }
}

impl Mapper for TableMapper {
    fn table(&self) -> &str {
        &self.table
    }

    fn next_identity(&self) -> StorageResult<RowId> {
        let mut state = self.store.state.write();
        if state.closed {
            return Err(StorageError::Closed);
        }
        if !state.schemas.contains_key(&self.table) {
            return Err(StorageError::UnknownTable(self.table.clone()));
        }
        let state = &mut *state;
        let mut work = Work {
            schemas: &state.schemas,
            tables: Tables::new(),
            sequences: &mut state.sequences,
            foreign_key_checks: state.foreign_key_checks,
            min_identity: state.min_identity,
        };
        let max_existing = state
            .tables
            .get(&self.table)
            .and_then(|t| t.rows.keys().next_back().copied());
        if let Some(max) = max_existing {
            work.bump_sequence(&self.table, max);
        }
        let id = work.advance_sequence(&self.table);
        drop(work);
        self.store.record(Statement::ReserveIdentity {
            table: self.table.clone(),
            id,
        });
        Ok(id)
    }

    fn raise_identity(&self, min: RowId) -> StorageResult<()> {
        let mut state = self.store.state.write();
        if state.closed {
            return Err(StorageError::Closed);
        }
        if !state.schemas.contains_key(&self.table) {
            return Err(StorageError::UnknownTable(self.table.clone()));
        }
        let current = state.sequences.entry(self.table.clone()).or_insert(0);
        let floor = min.saturating_sub(1);
        if floor > *current {
            *current = floor;
        }
        Ok(())
    }

    fn find(&self, id: RowId) -> StorageResult<Option<Row>> {
        let statement = Statement::Select {
            table: self.table.clone(),
            filter: Filter::eq(ID_COLUMN, id),
        };
        self.store
            .read(statement, |tables| Ok(self.rows_of(tables)?.get(&id).cloned()))
    }

    fn find_by_ids(&self, ids: &[RowId]) -> StorageResult<Vec<Row>> {
        let statement = Statement::Select {
            table: self.table.clone(),
            filter: Filter::eq(ID_COLUMN, ids.to_vec()),
        };
        self.store.read(statement, |tables| {
            let rows = self.rows_of(tables)?;
            let mut wanted: Vec<RowId> = ids.to_vec();
            wanted.sort_unstable();
            wanted.dedup();
            Ok(wanted
                .iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect())
        })
    }

    fn find_ids_by(&self, filter: &Filter, options: &FindOptions) -> StorageResult<Vec<RowId>> {
        let statement = Statement::Select {
            table: self.table.clone(),
            filter: filter.clone(),
        };
        self.store.read(statement, |tables| {
            let mut matched: Vec<(&RowId, &Row)> = self
                .rows_of(tables)?
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .collect();
            if let Some((column, order)) = &options.order_by {
                matched.sort_by(|(a_id, a), (b_id, b)| {
                    let a_val = a.get(column).unwrap_or(&Value::Null);
                    let b_val = b.get(column).unwrap_or(&Value::Null);
                    let ord = compare_values(a_val, b_val).then_with(|| a_id.cmp(b_id));
                    match order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                });
            }
            Ok(matched
                .into_iter()
                .skip(options.offset)
                .take(options.limit.unwrap_or(usize::MAX))
                .map(|(id, _)| *id)
                .collect())
        })
    }

    fn count_by(&self, filter: &Filter) -> StorageResult<usize> {
        let statement = Statement::Select {
            table: self.table.clone(),
            filter: filter.clone(),
        };
        self.store.read(statement, |tables| {
            Ok(self
                .rows_of(tables)?
                .values()
                .filter(|row| filter.matches(row))
                .count())
        })
    }

    fn insert(&self, row: Row) -> StorageResult<RowId> {
        let statement = Statement::Insert {
            table: self.table.clone(),
            rows: vec![row.clone()],
        };
        self.store
            .write(statement, |work| work.insert(&self.table, row))
    }

    fn batch_insert(&self, rows: Vec<Row>) -> StorageResult<Vec<RowId>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let statement = Statement::Insert {
            table: self.table.clone(),
            rows: rows.clone(),
        };
        self.store.write(statement, |work| {
            rows.into_iter()
                .map(|row| work.insert(&self.table, row))
                .collect()
        })
    }

    fn update(&self, id: RowId, changes: Row) -> StorageResult<()> {
        let statement = Statement::Update {
            table: self.table.clone(),
            id,
            changes: changes.clone(),
        };
        self.store
            .write(statement, |work| work.update(&self.table, id, changes))
    }

    fn delete_by_id(&self, id: RowId) -> StorageResult<bool> {
        let statement = Statement::Delete {
            table: self.table.clone(),
            id,
        };
        self.store
            .write(statement, |work| work.delete(&self.table, id))
    }

    fn delete_all(&self) -> StorageResult<usize> {
        let statement = Statement::DeleteAll {
            table: self.table.clone(),
        };
        self.store.write(statement, |work| {
            work.entity_schema(&self.table)?;
            let ids: Vec<RowId> = work
                .tables
                .get(&self.table)
                .map(|t| t.rows.keys().copied().collect())
                .unwrap_or_default();
            let mut deleted = 0;
            for id in ids {
                if work.delete(&self.table, id)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    fn add_relation(&self, join_table: &str, row: Row) -> StorageResult<()> {
        let statement = Statement::InsertRelation {
            table: join_table.to_string(),
            row: row.clone(),
        };
        self.store
            .write(statement, |work| work.add_link(join_table, row))
    }

    fn remove_relation(&self, join_table: &str, row: &Row) -> StorageResult<bool> {
        let statement = Statement::DeleteRelation {
            table: join_table.to_string(),
            row: row.clone(),
        };
        self.store
            .write(statement, |work| work.remove_link(join_table, row))
    }

    fn find_relations(&self, join_table: &str, filter: &Filter) -> StorageResult<Vec<Row>> {
        let statement = Statement::Select {
            table: join_table.to_string(),
            filter: filter.clone(),
        };
        self.store.read(statement, |tables| {
            let table = tables
                .get(join_table)
                .ok_or_else(|| StorageError::UnknownTable(join_table.to_string()))?;
            Ok(table
                .links
                .iter()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect())
        })
    }
}
