//! Query options understood by indexes and the storage-level query shape
//! they are translated into.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Row, Value};

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("ASC"),
            Self::Desc => f.write_str("DESC"),
        }
    }
}

/// Options accompanying an equality query.
///
/// `offset_id` together with a single `_id` sort column is the cursor
/// pagination mechanism: results start after (or at, with
/// `offset_include`) the row carrying that id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort: Vec<String>,
    pub order: Option<SortOrder>,
    pub offset_id: Option<Value>,
    pub offset_include: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sort by a single column.
    pub fn sorted_by(mut self, column: impl Into<String>) -> Self {
        self.sort = vec![column.into()];
        self
    }

    /// Sort by several columns, first column first.
    pub fn sorted_by_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Continue after the row identified by `offset_id`.
    pub fn after(mut self, offset_id: impl Into<Value>) -> Self {
        self.offset_id = Some(offset_id.into());
        self
    }

    /// Include the offset row itself in the result.
    pub fn including_offset(mut self) -> Self {
        self.offset_include = true;
        self
    }
}

/// Comparison operator for range conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    /// Evaluate `left <op> right` given their ordering.
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        f.write_str(op)
    }
}

/// A `column <op> value` range condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
}

/// A query as handed to the backing store: equality on `equals` plus any
/// range conditions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuery {
    pub equals: Row,
    pub conditions: Vec<Condition>,
}

impl StorageQuery {
    pub fn new(equals: Row) -> Self {
        Self {
            equals,
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl From<Row> for StorageQuery {
    fn from(equals: Row) -> Self {
        Self::new(equals)
    }
}

/// One `ORDER BY` term. `order: None` leaves the direction to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub order: Option<SortOrder>,
}

/// Storage-level `LIMIT` / `ORDER BY`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    pub limit: Option<usize>,
    pub order_by: Vec<OrderBy>,
}

impl StorageOptions {
    /// Translate query options: `limit` becomes `LIMIT`, every sort column
    /// becomes an `ORDER BY` term carrying the requested order.
    pub fn from_find_options(options: &FindOptions) -> Self {
        Self {
            limit: options.limit,
            order_by: options
                .sort
                .iter()
                .map(|column| OrderBy {
                    column: column.clone(),
                    order: options.order,
                })
                .collect(),
        }
    }
}
