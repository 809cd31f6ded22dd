//! Row compaction for the shared cache.
//!
//! A bucket is keyed by the values of its indexed columns, so storing
//! those values in every cached row is redundant. Compactors strip what can
//! be re-derived and put it back on read from the query that produced the
//! cache key.

use std::collections::HashMap;
use std::sync::Arc;

use strata_types::{split_from_row, FindOptions, Row};

use crate::error::IndexResult;
use crate::feature::UniqueFeatureIndex;
use crate::traits::Index;

pub trait Compactor: Send + Sync {
    /// The subset of `row` worth storing in the shared cache.
    fn compact_row(&self, row: &Row) -> Row;

    fn compact_rows(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter().map(|row| self.compact_row(row)).collect()
    }

    /// Rebuild full rows from compacted cache entries. `key_to_query` maps
    /// each cache key to the query that produced it.
    fn expand_cache_result(
        &self,
        cached: HashMap<String, Vec<Row>>,
        key_to_query: &HashMap<String, Row>,
    ) -> IndexResult<HashMap<String, Vec<Row>>>;

    /// Whether expanding `cached` would be answered without I/O.
    fn found_expanded(
        &self,
        _cached: &HashMap<String, Vec<Row>>,
        _key_to_query: &HashMap<String, Row>,
    ) -> IndexResult<bool> {
        Ok(true)
    }
}

/// Drops the indexed columns; they are restored from the query.
#[derive(Clone, Debug)]
pub struct FeatureCompactor {
    indexed: Vec<String>,
}

impl FeatureCompactor {
    pub fn new(indexed: Vec<String>) -> Self {
        Self { indexed }
    }
}

impl Compactor for FeatureCompactor {
    fn compact_row(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(column, _)| !self.indexed.contains(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    fn expand_cache_result(
        &self,
        cached: HashMap<String, Vec<Row>>,
        key_to_query: &HashMap<String, Row>,
    ) -> IndexResult<HashMap<String, Vec<Row>>> {
        Ok(cached
            .into_iter()
            .map(|(key, rows)| {
                let expanded = match key_to_query.get(&key) {
                    Some(query) => rows
                        .into_iter()
                        .map(|row| {
                            let mut full = query.clone();
                            full.extend(row);
                            full
                        })
                        .collect(),
                    None => rows,
                };
                (key, expanded)
            })
            .collect())
    }
}

/// Caches only the primary key of each row (plus any retained ordering
/// columns) and expands through a [`UniqueFeatureIndex`] on that key.
pub struct ShallowCompactor {
    inner: FeatureCompactor,
    shallow: Arc<UniqueFeatureIndex>,
    retained: Vec<String>,
}

impl ShallowCompactor {
    pub fn new(indexed: Vec<String>, shallow: Arc<UniqueFeatureIndex>, retained: Vec<String>) -> Self {
        Self {
            inner: FeatureCompactor::new(indexed),
            shallow,
            retained,
        }
    }

    pub fn shallow(&self) -> &Arc<UniqueFeatureIndex> {
        &self.shallow
    }

    fn keeps(&self, column: &String) -> bool {
        self.shallow.indexed_columns().contains(column) || self.retained.contains(column)
    }

    /// Primary-key queries for every row, de-duplicated, first-seen order.
    fn unique_queries<'a>(&self, buckets: impl Iterator<Item = &'a Vec<Row>>) -> Vec<Row> {
        let columns = self.shallow.indexed_columns();
        let mut queries: Vec<Row> = Vec::new();
        for row in buckets.flatten() {
            if let Some(key) = split_from_row(row, columns) {
                if !queries.contains(&key) {
                    queries.push(key);
                }
            }
        }
        queries
    }
}

impl Compactor for ShallowCompactor {
    fn compact_row(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(column, _)| self.keeps(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    fn expand_cache_result(
        &self,
        cached: HashMap<String, Vec<Row>>,
        key_to_query: &HashMap<String, Row>,
    ) -> IndexResult<HashMap<String, Vec<Row>>> {
        let merged = self.inner.expand_cache_result(cached, key_to_query)?;
        let queries = self.unique_queries(merged.values());
        let found = self.shallow.find_multi(&queries, &FindOptions::default())?;
        let by_key: HashMap<Row, Row> = queries
            .into_iter()
            .zip(found)
            .filter_map(|(query, mut rows)| rows.pop().map(|row| (query, row)))
            .collect();

        let columns = self.shallow.indexed_columns();
        Ok(merged
            .into_iter()
            .map(|(key, rows)| {
                // rows whose target no longer exists are dropped
                let full = rows
                    .iter()
                    .filter_map(|row| split_from_row(row, columns))
                    .filter_map(|pk| by_key.get(&pk).cloned())
                    .collect();
                (key, full)
            })
            .collect())
    }

    fn found_expanded(
        &self,
        cached: &HashMap<String, Vec<Row>>,
        key_to_query: &HashMap<String, Row>,
    ) -> IndexResult<bool> {
        let merged = self.inner.expand_cache_result(cached.clone(), key_to_query)?;
        let queries = self.unique_queries(merged.values());
        self.shallow.found_multi(&queries, &FindOptions::default())
    }
}

impl std::fmt::Debug for ShallowCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShallowCompactor")
            .field("inner", &self.inner)
            .field("shallow", &self.shallow.name())
            .field("retained", &self.retained)
            .finish()
    }
}
