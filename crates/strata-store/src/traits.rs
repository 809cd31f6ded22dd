use strata_types::{Row, StorageOptions, StorageQuery};

use crate::error::StoreResult;

/// Backing store for flat rows of a single domain class.
///
/// Implementations are supplied by the embedding application (typically a
/// relational table adapter). All implementations must satisfy:
/// - Querying is equality based, with optional range conditions used for
///   cursor pagination.
/// - [`ObjectStorage::find_multi`] returns exactly one result list per input
///   query, in input order. Results are never flattened or reordered.
/// - [`ObjectStorage::insert`] returns the rows as actually stored,
///   including any storage-assigned columns, in input order.
pub trait ObjectStorage: Send + Sync {
    /// Run a single query.
    fn find(&self, query: &StorageQuery, options: &StorageOptions) -> StoreResult<Vec<Row>> {
        let mut results = self.find_multi(std::slice::from_ref(query), options)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Run a batch of queries, one result list per query, in input order.
    fn find_multi(
        &self,
        queries: &[StorageQuery],
        options: &StorageOptions,
    ) -> StoreResult<Vec<Vec<Row>>>;

    /// Columns making up the primary key, in the order ids are given.
    fn primary_key_columns(&self) -> &[String];

    /// Insert a batch of rows and return them as stored.
    fn insert(&self, rows: &[Row]) -> StoreResult<Vec<Row>>;

    /// Replace the row identified by `old` with `new`. Returns `false` if
    /// no such row exists.
    fn update(&self, old: &Row, new: &Row) -> StoreResult<bool>;

    /// Delete the row identified by `row`. Returns `false` if no such row
    /// exists.
    fn remove(&self, row: &Row) -> StoreResult<bool>;

    /// Whether `row` is complete enough to be placed in a shared cache.
    fn validate(&self, _row: &Row) -> bool {
        true
    }
}
