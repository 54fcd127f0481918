//! Minimal query surface: equality filters, single-column ordering and paging.

use crate::row::{Row, Value};
use std::cmp::Ordering;
use std::fmt::Write as _;

/// A conjunction of `column = value` conditions.
///
/// An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Creates a filter that matches every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a filter with a single equality condition.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, value)
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Returns the conditions in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Returns `true` if the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Returns `true` if every condition holds for the row.
    ///
    /// A missing column compares equal to `null`.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            actual == expected
        })
    }

    /// Returns a stable textual key for the filter.
    ///
    /// Conditions are sorted by column so that logically equal filters
    /// share a key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut sorted: Vec<_> = self.conditions.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut key = String::new();
        for (column, value) in sorted {
            let _ = write!(key, "{column}={value};");
        }
        key
    }

    /// Renders the filter as a `WHERE` clause body for the statement log.
    #[must_use]
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            return "1".to_string();
        }
        self.conditions
            .iter()
            .map(|(column, value)| format!("[{column}] = {value}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Ordering and paging for list queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Column to order by, with direction. Rows are ordered by id otherwise.
    pub order_by: Option<(String, SortOrder)>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Number of rows to skip.
    pub offset: usize,
}

impl FindOptions {
    /// Creates options with no ordering or paging.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders results by a column.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns a stable textual key for the options.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let order = match &self.order_by {
            Some((column, SortOrder::Asc)) => format!("{column} ASC"),
            Some((column, SortOrder::Desc)) => format!("{column} DESC"),
            None => String::new(),
        };
        let limit = self.limit.map(|l| l.to_string()).unwrap_or_default();
        format!("order={order};limit={limit};offset={}", self.offset)
    }
}

/// Total order over JSON values used for sorting rows.
///
/// `null` sorts first, then booleans, numbers, strings, and finally arrays
/// and objects compared by their text.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
