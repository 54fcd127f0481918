//! Statement log entries.

use crate::query::Filter;
use crate::row::{Row, RowId};
use std::fmt;

/// A statement executed against a store.
///
/// Stores record every statement they execute so tests and diagnostics can
/// inspect exactly what a flush did. The [`fmt::Display`] form is SQL-like
/// and is also used as the statement text attached to storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `BEGIN`
    Begin,
    /// `COMMIT`
    Commit,
    /// `ROLLBACK`
    Rollback,
    /// `SET FOREIGN_KEY_CHECKS`
    SetForeignKeyChecks(bool),
    /// Identity reservation from a table sequence.
    ReserveIdentity {
        /// Table whose sequence was advanced.
        table: String,
        /// Reserved identity.
        id: RowId,
    },
    /// Single or multi-row insert.
    Insert {
        /// Target table.
        table: String,
        /// Inserted rows.
        rows: Vec<Row>,
    },
    /// Update of one row by id.
    Update {
        /// Target table.
        table: String,
        /// Row id.
        id: RowId,
        /// Changed columns only.
        changes: Row,
    },
    /// Delete of one row by id.
    Delete {
        /// Target table.
        table: String,
        /// Row id.
        id: RowId,
    },
    /// Delete of every row in a table.
    DeleteAll {
        /// Target table.
        table: String,
    },
    /// Join row insert.
    InsertRelation {
        /// Join table.
        table: String,
        /// Join row.
        row: Row,
    },
    /// Join row delete.
    DeleteRelation {
        /// Join table.
        table: String,
        /// Join row.
        row: Row,
    },
    /// Read by filter.
    Select {
        /// Source table.
        table: String,
        /// Filter applied.
        filter: Filter,
    },
}

impl Statement {
    /// Returns `true` for statements that modify rows.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. }
                | Self::Update { .. }
                | Self::Delete { .. }
                | Self::DeleteAll { .. }
                | Self::InsertRelation { .. }
                | Self::DeleteRelation { .. }
        )
    }

    /// Returns the table the statement targets, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::ReserveIdentity { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::DeleteAll { table }
            | Self::InsertRelation { table, .. }
            | Self::DeleteRelation { table, .. }
            | Self::Select { table, .. } => Some(table),
            Self::Begin | Self::Commit | Self::Rollback | Self::SetForeignKeyChecks(_) => None,
        }
    }
}

fn write_assignments(f: &mut fmt::Formatter<'_>, row: &Row, sep: &str) -> fmt::Result {
    for (i, (column, value)) in row.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "[{column}] = {value}")?;
    }
    Ok(())
}

fn write_values(f: &mut fmt::Formatter<'_>, row: &Row) -> fmt::Result {
    f.write_str("(")?;
    for (i, value) in row.values().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{value}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("BEGIN"),
            Self::Commit => f.write_str("COMMIT"),
            Self::Rollback => f.write_str("ROLLBACK"),
            Self::SetForeignKeyChecks(on) => {
                write!(f, "SET FOREIGN_KEY_CHECKS = {}", u8::from(*on))
            }
            Self::ReserveIdentity { table, id } => {
                write!(f, "SELECT NEXTVAL([{table}]) -- {id}")
            }
            Self::Insert { table, rows } => {
                write!(f, "INSERT INTO [{table}]")?;
                if let Some(first) = rows.first() {
                    let columns: Vec<_> = first.keys().map(|c| format!("[{c}]")).collect();
                    write!(f, " ({}) VALUES ", columns.join(", "))?;
                }
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_values(f, row)?;
                }
                Ok(())
            }
            Self::Update { table, id, changes } => {
                write!(f, "UPDATE [{table}] SET ")?;
                write_assignments(f, changes, ", ")?;
                write!(f, " WHERE [id] = {id}")
            }
            Self::Delete { table, id } => write!(f, "DELETE FROM [{table}] WHERE [id] = {id}"),
            Self::DeleteAll { table } => write!(f, "DELETE FROM [{table}]"),
            Self::InsertRelation { table, row } => {
                write!(f, "INSERT INTO [{table}] ")?;
                write_values(f, row)
            }
            Self::DeleteRelation { table, row } => {
                write!(f, "DELETE FROM [{table}] WHERE ")?;
                write_assignments(f, row, " AND ")
            }
            Self::Select { table, filter } => {
                write!(f, "SELECT * FROM [{table}] WHERE {}", filter.to_sql())
            }
        }
    }
}
