//! Row filters shared by every store backend.
//!
//! A filter is a conjunction of equality and membership clauses plus an
//! optional ordering. Memory backends evaluate it directly against rows;
//! the Postgres backend compiles it into a WHERE clause after checking the
//! columns against the table whitelist.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use super::{Row, StoreError};
use crate::model::ResourceKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Clause {
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. } | Self::In { column, .. } => column,
        }
    }

    fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq { column, value } => row.get(column) == Some(value),
            Self::In { column, values } => row.get(column).is_some_and(|v| values.contains(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
    order: Option<Order>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq { column: column.to_owned(), value: value.into() });
        self
    }

    #[must_use]
    pub fn is_in<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push(Clause::In { column: column.to_owned(), values });
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str) -> Self {
        self.order = Some(Order { column: column.to_owned(), descending: false });
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order = Some(Order { column: column.to_owned(), descending: true });
        self
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    #[must_use]
    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    /// True when no clause restricts the rows. Ordering does not count.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Reject any column the table does not declare.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` for the first foreign column.
    pub fn validate(&self, kind: ResourceKind) -> Result<(), StoreError> {
        let columns = self.clauses.iter().map(Clause::column).chain(self.order.iter().map(|o| o.column.as_str()));
        for column in columns {
            if !kind.has_column(column) {
                return Err(StoreError::UnknownColumn { kind, column: column.to_owned() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
    }

    /// Apply the ordering in place. Rows without the column sort last.
    pub fn sort(&self, rows: &mut [Row]) {
        let Some(order) = &self.order else {
            return;
        };
        rows.sort_by(|a, b| {
            let ord = compare_values(a.get(&order.column), b.get(&order.column));
            if order.descending { ord.reverse() } else { ord }
        });
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query-string rendering, e.g. `session_id=eq.42&order=order_index.asc`.
/// Used in logs and as part of subscription descriptions.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| match clause {
                Clause::Eq { column, value } => format!("{column}=eq.{}", render(value)),
                Clause::In { column, values } => {
                    let list: Vec<String> = values.iter().map(render).collect();
                    format!("{column}=in.({})", list.join(","))
                }
            })
            .collect();
        if let Some(order) = &self.order {
            let dir = if order.descending { "desc" } else { "asc" };
            parts.push(format!("order={}.{dir}", order.column));
        }
        f.write_str(&parts.join("&"))
    }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod tests;
