use strata_types::{FindOptions, Metadata, Row};

use crate::error::IndexResult;

/// A named secondary index over one fixed set of equality columns.
///
/// An index caches the result list of each equality key in the shared
/// cache and falls through to whatever it wraps (usually the backing
/// store) on a miss. It keeps itself consistent by receiving the write
/// events of every manager it is registered with; a write that bypasses
/// the managers leaves its cache stale.
pub trait Index: Send + Sync {
    fn name(&self) -> &str;

    /// The equality columns this index is keyed by, in declaration order.
    fn indexed_columns(&self) -> &[String];

    /// True iff `keys` equals the indexed column set (order-independent)
    /// and the index supports `options`.
    fn can_answer(&self, keys: &[String], options: &FindOptions) -> bool;

    /// Maximum number of rows cached per key.
    fn limit(&self) -> usize;

    /// Columns the cached buckets are ordered by, if any.
    fn sort(&self) -> Option<&[String]>;

    fn find(&self, query: &Row, options: &FindOptions) -> IndexResult<Vec<Row>> {
        let mut results = self.find_multi(std::slice::from_ref(query), options)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Answer a batch of queries. The result has one entry per query, in
    /// input order; queries without matches yield an empty list.
    fn find_multi(&self, queries: &[Row], options: &FindOptions) -> IndexResult<Vec<Vec<Row>>>;

    fn found(&self, query: &Row, options: &FindOptions) -> IndexResult<bool> {
        self.found_multi(std::slice::from_ref(query), options)
    }

    /// Whether every query can be answered from locally resident cache
    /// entries. Performs no I/O.
    fn found_multi(&self, queries: &[Row], options: &FindOptions) -> IndexResult<bool>;

    /// Invalidate every cache entry that could contain `row`.
    ///
    /// Takes only the row: bucket keys derive from column values, so the
    /// owning object is never needed. Managers pass the object's last-known
    /// row.
    fn cache_purge(&self, row: &Row) -> IndexResult<()>;

    fn on_after_insert(&self, new: &Row, metadata: &Metadata) -> IndexResult<()>;

    fn on_after_update(&self, old: &Row, new: &Row, metadata: &Metadata) -> IndexResult<()>;

    fn on_after_remove(&self, old: &Row, metadata: &Metadata) -> IndexResult<()>;

    fn on_after_load(&self, _row: &Row) -> IndexResult<()> {
        Ok(())
    }

    fn on_after_clear(&self) -> IndexResult<()> {
        Ok(())
    }
}
