//! Row model.

use std::collections::BTreeMap;

pub use serde_json::Value;

/// Identifier of a row in a table.
pub type RowId = u64;

/// Name of the primary key column every entity table carries.
pub const ID_COLUMN: &str = "id";

/// A single table row: column name to value, ordered by column name.
///
/// The ordering makes rows comparable and their textual form stable, which
/// the change-tracking layer relies on when diffing snapshots.
pub type Row = BTreeMap<String, Value>;

/// Reads the primary key from a row.
///
/// Returns `None` when the column is missing, null, or not a non-negative
/// integer.
#[must_use]
pub fn row_id(row: &Row) -> Option<RowId> {
    row.get(ID_COLUMN).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_reads_integer_key() {
        let mut row = Row::new();
        row.insert(ID_COLUMN.into(), Value::from(7u64));
        assert_eq!(row_id(&row), Some(7));
    }

    #[test]
    fn row_id_ignores_null_and_text() {
        let mut row = Row::new();
        row.insert(ID_COLUMN.into(), Value::Null);
        assert_eq!(row_id(&row), None);

        row.insert(ID_COLUMN.into(), Value::from("7"));
        assert_eq!(row_id(&row), None);
    }
}
