//! Backend-agnostic query descriptions.
//!
//! [`Select`] is what views hand to a [`DataService`](crate::backend::DataService):
//! a column list, equality filters, an optional free-text search, one
//! ordering and an optional limit. Both backends interpret the same value,
//! the in-memory one by evaluating it, the REST one by encoding it as
//! PostgREST query parameters.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Table;

/// A row as returned by the backend.
pub type Row = serde_json::Map<String, Value>;

/// Primary key of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: Value },
    /// Case-insensitive substring match on any of the columns.
    Search { columns: Vec<String>, term: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn search(columns: &[&str], term: impl Into<String>) -> Self {
        Filter::Search {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            term: term.into(),
        }
    }

    /// Evaluate the filter against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq { column, value } => row.get(column).unwrap_or(&Value::Null) == value,
            Filter::Search { columns, term } => {
                let needle = term.to_lowercase();
                columns.iter().any(|c| {
                    row.get(c)
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                })
            }
        }
    }
}

/// Sort order on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Compare two rows on the order column. Nulls sort last.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = match (a.get(&self.column), b.get(&self.column)) {
            (Some(Value::Null) | None, Some(Value::Null) | None) => return Ordering::Equal,
            (Some(Value::Null) | None, _) => return Ordering::Greater,
            (_, Some(Value::Null) | None) => return Ordering::Less,
            (Some(x), Some(y)) => compare_values(x, y),
        };
        if self.ascending { ord } else { ord.reverse() }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Related row embedded into each result row (`select=*,devis(*)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub table: Table,
    /// Column of the outer row referencing the related row's `id`.
    pub foreign_key: String,
}

/// A read query against one table.
///
/// ```rust
/// # use tuile::{Filter, Order, Select};
/// let select = Select::all()
///     .filter(Filter::eq("statut", "accepte"))
///     .order(Order::desc("created_at"))
///     .limit(10);
/// assert_eq!(select.filters.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Select {
    /// Columns to return; `None` means all columns.
    pub columns: Option<Vec<String>>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    /// Select all columns.
    pub fn all() -> Self {
        Self::default()
    }

    /// Select only the given columns.
    pub fn columns(columns: &[&str]) -> Self {
        Self {
            columns: Some(columns.iter().map(|c| c.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn embed(mut self, table: Table, foreign_key: impl Into<String>) -> Self {
        self.embeds.push(Embed {
            table,
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether a row passes every filter.
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Keep only the selected columns (embeds are always kept).
    pub fn project(&self, row: &Row) -> Row {
        match &self.columns {
            None => row.clone(),
            Some(cols) => row
                .iter()
                .filter(|(k, _)| {
                    cols.iter().any(|c| c == *k) || self.embeds.iter().any(|e| e.table.as_str() == *k)
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
