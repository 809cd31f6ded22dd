use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use strata_types::{
    split_from_row, BinaryId, Row, StorageOptions, StorageQuery, Value,
};

use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectStorage;

type Validator = Box<dyn Fn(&Row) -> bool + Send + Sync>;

/// In-memory row table.
///
/// Intended for tests and embedding. Rows live in insertion order behind a
/// `RwLock`. Equality uses the loose, string-wise comparison a relational
/// store applies to mixed integer/text values.
pub struct InMemoryStorage {
    primary_key: Vec<String>,
    generated_id: Option<String>,
    rows: RwLock<Vec<Row>>,
    validator: Option<Validator>,
    queries: AtomicUsize,
}

impl InMemoryStorage {
    /// Create an empty table with the given primary key columns.
    pub fn new<I, S>(primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            generated_id: None,
            rows: RwLock::new(Vec::new()),
            validator: None,
            queries: AtomicUsize::new(0),
        }
    }

    /// Assign a fresh [`BinaryId`] to `column` on insert when the row does
    /// not carry one.
    pub fn with_generated_id(mut self, column: impl Into<String>) -> Self {
        self.generated_id = Some(column.into());
        self
    }

    /// Install the cache-validity check reported by [`ObjectStorage::validate`].
    pub fn with_validator(mut self, validator: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.read_rows().is_empty()
    }

    /// Number of queries answered so far. Each query of a batch counts.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Snapshot of all rows in insertion order.
    pub fn all_rows(&self) -> Vec<Row> {
        self.read_rows().clone()
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, Vec<Row>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Row>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_of(&self, row: &Row) -> StoreResult<Row> {
        split_from_row(row, &self.primary_key).ok_or_else(|| {
            let column = self
                .primary_key
                .iter()
                .find(|c| row.get(*c).map_or(true, Value::is_null))
                .cloned()
                .unwrap_or_default();
            StoreError::MissingPrimaryKey { column }
        })
    }

    fn position_of(rows: &[Row], key: &Row) -> Option<usize> {
        rows.iter().position(|candidate| row_matches(candidate, key))
    }

    fn run_query(rows: &[Row], query: &StorageQuery, options: &StorageOptions) -> Vec<Row> {
        let mut found: Vec<Row> = rows
            .iter()
            .filter(|row| row_matches(row, &query.equals))
            .filter(|row| {
                query.conditions.iter().all(|cond| {
                    row.get(&cond.column)
                        .is_some_and(|v| cond.op.holds(v.compare(&cond.value)))
                })
            })
            .cloned()
            .collect();

        if !options.order_by.is_empty() {
            found.sort_by(|a, b| {
                for term in &options.order_by {
                    let left = a.get(&term.column).unwrap_or(&Value::Null);
                    let right = b.get(&term.column).unwrap_or(&Value::Null);
                    let mut ordering = left.compare(right);
                    if term.order == Some(strata_types::SortOrder::Desc) {
                        ordering = ordering.reverse();
                    }
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = options.limit {
            found.truncate(limit);
        }
        found
    }
}

fn row_matches(row: &Row, equals: &Row) -> bool {
    equals
        .iter()
        .all(|(column, expected)| row.get(column).is_some_and(|v| v.loosely_eq(expected)))
}

impl ObjectStorage for InMemoryStorage {
    fn find_multi(
        &self,
        queries: &[StorageQuery],
        options: &StorageOptions,
    ) -> StoreResult<Vec<Vec<Row>>> {
        self.queries.fetch_add(queries.len(), Ordering::Relaxed);
        trace!(queries = queries.len(), limit = ?options.limit, "find");
        let rows = self.read_rows();
        Ok(queries
            .iter()
            .map(|query| Self::run_query(&rows, query, options))
            .collect())
    }

    fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    fn insert(&self, rows: &[Row]) -> StoreResult<Vec<Row>> {
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = row.clone();
            if let Some(column) = &self.generated_id {
                if row.get(column).map_or(true, Value::is_null) {
                    row.insert(column.clone(), Value::from(BinaryId::generate()));
                }
            }
            prepared.push(row);
        }

        let mut table = self.write_rows();
        // validate the whole batch first so a failure leaves no partial insert
        for (i, row) in prepared.iter().enumerate() {
            let key = self.key_of(row)?;
            let clashes_stored = Self::position_of(&table, &key).is_some();
            let clashes_batch = Self::position_of(&prepared[..i], &key).is_some();
            if clashes_stored || clashes_batch {
                debug!(row = i, "duplicate primary key, batch rejected");
                return Err(StoreError::DuplicateKey(
                    serde_json::to_string(&key).unwrap_or_default(),
                ));
            }
        }
        table.extend(prepared.iter().cloned());
        trace!(count = prepared.len(), "inserted");
        Ok(prepared)
    }

    fn update(&self, old: &Row, new: &Row) -> StoreResult<bool> {
        let old_key = self.key_of(old)?;
        let new_key = self.key_of(new)?;
        let mut table = self.write_rows();
        let Some(pos) = Self::position_of(&table, &old_key) else {
            return Ok(false);
        };
        if let Some(other) = Self::position_of(&table, &new_key) {
            if other != pos {
                return Err(StoreError::DuplicateKey(
                    serde_json::to_string(&new_key).unwrap_or_default(),
                ));
            }
        }
        table[pos] = new.clone();
        Ok(true)
    }

    fn remove(&self, row: &Row) -> StoreResult<bool> {
        let key = self.key_of(row)?;
        let mut table = self.write_rows();
        match Self::position_of(&table, &key) {
            Some(pos) => {
                table.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn validate(&self, row: &Row) -> bool {
        self.validator.as_ref().map_or(true, |validate| validate(row))
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("primary_key", &self.primary_key)
            .field("row_count", &self.len())
            .finish()
    }
}
