//! Feature indexes: cache buckets keyed by the values of a fixed column set.
//!
//! [`FeatureIndex`] holds the shared machinery (cache keys, batched lookups,
//! write-event invalidation). A [`BucketPolicy`] decides how big a bucket
//! may grow, how it is ordered, and how query windows are cut from it.

use std::collections::HashMap;
use std::sync::Arc;

use strata_cache::ObjectCache;
use strata_store::ObjectStorage;
use strata_types::{
    alphadecimal_ids, rows_equal, split_from_row, FindOptions, Metadata, OrderBy, Row,
    SortOrder, StorageOptions, StorageQuery, Value,
};
use tracing::trace;

use crate::compactor::{Compactor, FeatureCompactor, ShallowCompactor};
use crate::error::{IndexError, IndexResult};
use crate::traits::Index;

/// Bucket sizing and windowing rules of a [`FeatureIndex`].
pub trait BucketPolicy: Send + Sync {
    fn limit(&self) -> usize;

    fn sort(&self) -> Option<&[String]> {
        None
    }

    /// Option checks beyond the shared column and window-size checks.
    fn supports(&self, _options: &FindOptions) -> bool {
        true
    }

    /// Storage options used to fill a bucket.
    fn query_options(&self) -> StorageOptions;

    /// Bound a freshly loaded bucket.
    fn limit_index_size(&self, key: &Row, rows: Vec<Row>) -> IndexResult<Vec<Row>>;

    /// Cut the window requested by `options` out of a bucket.
    fn filter_results(&self, rows: Vec<Row>, _options: &FindOptions) -> Vec<Row> {
        rows
    }
}

/// Index whose buckets hold at most one row.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unique;

impl BucketPolicy for Unique {
    fn limit(&self) -> usize {
        1
    }

    fn query_options(&self) -> StorageOptions {
        StorageOptions::default()
    }

    fn limit_index_size(&self, key: &Row, rows: Vec<Row>) -> IndexResult<Vec<Row>> {
        if rows.len() > 1 {
            return Err(IndexError::UniqueViolation(json(key)));
        }
        Ok(rows)
    }
}

/// Construction options of a [`TopKIndex`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopKOptions {
    pub limit: usize,
    pub sort: Vec<String>,
    pub order: SortOrder,
}

impl Default for TopKOptions {
    fn default() -> Self {
        Self {
            limit: 500,
            sort: Vec::new(),
            order: SortOrder::Desc,
        }
    }
}

impl TopKOptions {
    pub fn sorted_by(column: impl Into<String>) -> Self {
        Self {
            sort: vec![column.into()],
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// Index keeping the first `limit` rows of each bucket by a fixed ordering.
#[derive(Clone, Debug)]
pub struct TopK {
    options: TopKOptions,
}

impl TopK {
    fn sort_column(&self) -> &str {
        self.options.sort.first().map_or("", String::as_str)
    }

    /// Position of the first row past the cursor, `rows.len()` if none.
    fn offset_position(&self, rows: &[Row], offset_id: &Value, include: bool) -> usize {
        let column = self.sort_column();
        rows.iter()
            .position(|row| {
                let Some(value) = row.get(column) else {
                    return false;
                };
                let ordering = compare_sort_values(column, value, offset_id);
                let past = match self.options.order {
                    SortOrder::Desc => ordering.is_lt(),
                    SortOrder::Asc => ordering.is_gt(),
                };
                past || (include && ordering.is_eq())
            })
            .unwrap_or(rows.len())
    }
}

impl BucketPolicy for TopK {
    fn limit(&self) -> usize {
        self.options.limit
    }

    fn sort(&self) -> Option<&[String]> {
        Some(self.options.sort.as_slice())
    }

    fn supports(&self, options: &FindOptions) -> bool {
        match options.order {
            Some(order) if !options.sort.is_empty() => {
                options.sort == self.options.sort && order == self.options.order
            }
            _ => true,
        }
    }

    fn query_options(&self) -> StorageOptions {
        StorageOptions {
            limit: Some(self.options.limit),
            order_by: self
                .options
                .sort
                .iter()
                .map(|column| OrderBy {
                    column: column.clone(),
                    order: Some(self.options.order),
                })
                .collect(),
        }
    }

    fn limit_index_size(&self, _key: &Row, mut rows: Vec<Row>) -> IndexResult<Vec<Row>> {
        rows.truncate(self.options.limit);
        Ok(rows)
    }

    fn filter_results(&self, rows: Vec<Row>, options: &FindOptions) -> Vec<Row> {
        let start = match &options.offset_id {
            Some(offset_id) => self.offset_position(&rows, offset_id, options.offset_include),
            None => options.offset.unwrap_or(0),
        };
        let limit = options.limit.unwrap_or(self.options.limit);
        rows.into_iter().skip(start).take(limit).collect()
    }
}

/// `_id` columns compare as identifiers so that raw bytes and text forms of
/// the same id agree.
fn compare_sort_values(column: &str, left: &Value, right: &Value) -> std::cmp::Ordering {
    if column.ends_with("_id") {
        if let (Ok(l), Ok(r)) = (left.to_binary_id(), right.to_binary_id()) {
            return l.cmp(&r);
        }
    }
    left.compare(right)
}

fn json(row: &Row) -> String {
    serde_json::to_string(row).unwrap_or_default()
}

/// Cache-backed index over the columns `indexed`.
pub struct FeatureIndex<P> {
    name: String,
    cache: Arc<ObjectCache>,
    storage: Arc<dyn ObjectStorage>,
    prefix: String,
    indexed: Vec<String>,
    indexed_ordered: Vec<String>,
    compactor: Box<dyn Compactor>,
    policy: P,
}

/// At most one row per key, e.g. lookups by primary key.
pub type UniqueFeatureIndex = FeatureIndex<Unique>;

/// The newest (or otherwise first-by-sort) rows per key.
pub type TopKIndex = FeatureIndex<TopK>;

impl FeatureIndex<Unique> {
    pub fn new(
        cache: Arc<ObjectCache>,
        storage: Arc<dyn ObjectStorage>,
        prefix: impl Into<String>,
        indexed: Vec<String>,
    ) -> Self {
        Self::with_policy(cache, storage, prefix.into(), indexed, Unique)
    }
}

impl FeatureIndex<TopK> {
    /// Fails with [`IndexError::Configuration`] unless `options.sort` names
    /// at least one column.
    pub fn new(
        cache: Arc<ObjectCache>,
        storage: Arc<dyn ObjectStorage>,
        prefix: impl Into<String>,
        indexed: Vec<String>,
        options: TopKOptions,
    ) -> IndexResult<Self> {
        let prefix = prefix.into();
        if options.sort.is_empty() {
            return Err(IndexError::Configuration(format!(
                "top-k index {prefix} needs a sort column"
            )));
        }
        if options.limit == 0 {
            return Err(IndexError::Configuration(format!(
                "top-k index {prefix} needs a positive limit"
            )));
        }
        Ok(Self::with_policy(cache, storage, prefix, indexed, TopK { options }))
    }

    /// Cache only primary keys, expanding them through `shallow`. The sort
    /// columns are kept so windows can be cut before expansion.
    pub fn shallow(mut self, shallow: Arc<UniqueFeatureIndex>) -> Self {
        let retained = self.policy.options.sort.clone();
        self.compactor = Box::new(ShallowCompactor::new(self.indexed.clone(), shallow, retained));
        self
    }

    pub fn order(&self) -> SortOrder {
        self.policy.options.order
    }
}

impl<P: BucketPolicy> FeatureIndex<P> {
    fn with_policy(
        cache: Arc<ObjectCache>,
        storage: Arc<dyn ObjectStorage>,
        prefix: String,
        indexed: Vec<String>,
        policy: P,
    ) -> Self {
        let mut indexed_ordered = indexed.clone();
        indexed_ordered.sort();
        Self {
            name: format!("{prefix}[{}]", indexed.join(",")),
            cache,
            storage,
            prefix,
            compactor: Box::new(FeatureCompactor::new(indexed.clone())),
            indexed,
            indexed_ordered,
            policy,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ---------------------------------------------------------------
    // Cache keys
    // ---------------------------------------------------------------

    /// Key of the bucket holding rows whose indexed columns equal `attributes`.
    pub fn cache_key(&self, attributes: &Row) -> String {
        let values: Vec<String> = alphadecimal_ids(attributes)
            .values()
            .map(Value::to_string)
            .collect();
        let digest = blake3::hash(values.join(":").as_bytes()).to_hex();
        let config = self.cache.config();
        self.cache.make_global_key(
            &self.prefix,
            &[config.db_id.as_str(), digest.as_str(), config.key_version.as_str()],
        )
    }

    fn cache_keys(&self, queries: &[Row]) -> IndexResult<Vec<String>> {
        queries
            .iter()
            .map(|query| {
                if !query.keys().eq(self.indexed_ordered.iter()) {
                    let columns: Vec<&str> = query.keys().map(String::as_str).collect();
                    return Err(IndexError::UnsupportedQuery(columns.join(", ")));
                }
                Ok(self.cache_key(query))
            })
            .collect()
    }

    fn indexed_part(&self, row: &Row) -> IndexResult<Row> {
        split_from_row(row, &self.indexed).ok_or_else(|| IndexError::Unindexable(json(row)))
    }

    fn purge_bucket(&self, indexed: &Row) {
        let key = self.cache_key(indexed);
        trace!(index = %self.name, %key, "purging bucket");
        self.cache.delete(&key);
    }

    // ---------------------------------------------------------------
    // Backing store
    // ---------------------------------------------------------------

    /// Load the buckets for `queries` from storage, one entry per query.
    /// Non-empty buckets whose rows all validate are cached compacted.
    fn backing_store_find_multi(
        &self,
        queries: &[Row],
        keys: &[String],
    ) -> IndexResult<Vec<Vec<Row>>> {
        let storage_queries: Vec<StorageQuery> =
            queries.iter().cloned().map(StorageQuery::from).collect();
        let stored = self
            .storage
            .find_multi(&storage_queries, &self.policy.query_options())?;

        let mut buckets = Vec::with_capacity(queries.len());
        for ((query, key), rows) in queries.iter().zip(keys).zip(stored) {
            let rows = self.policy.limit_index_size(query, rows)?;
            if !rows.is_empty() && rows.iter().all(|row| self.storage.validate(row)) {
                self.cache.set(key, self.compactor.compact_rows(&rows));
            }
            buckets.push(rows);
        }
        Ok(buckets)
    }
}

impl<P: BucketPolicy> Index for FeatureIndex<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn indexed_columns(&self) -> &[String] {
        &self.indexed
    }

    fn can_answer(&self, keys: &[String], options: &FindOptions) -> bool {
        let mut keys = keys.to_vec();
        keys.sort();
        if keys != self.indexed_ordered {
            return false;
        }
        if let Some(limit) = options.limit {
            if limit.saturating_add(options.offset.unwrap_or(0)) > self.policy.limit() {
                return false;
            }
        }
        self.policy.supports(options)
    }

    fn limit(&self) -> usize {
        self.policy.limit()
    }

    fn sort(&self) -> Option<&[String]> {
        self.policy.sort()
    }

    fn find_multi(&self, queries: &[Row], options: &FindOptions) -> IndexResult<Vec<Vec<Row>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.cache_keys(queries)?;

        let mut unique_keys: Vec<String> = Vec::new();
        for key in &keys {
            if !unique_keys.contains(key) {
                unique_keys.push(key.clone());
            }
        }
        let from_cache = self.cache.get_multi(&unique_keys);

        // each missing bucket is loaded once, even if queried repeatedly
        let mut miss_queries = Vec::new();
        let mut miss_keys: Vec<String> = Vec::new();
        for (query, key) in queries.iter().zip(&keys) {
            if !from_cache.contains_key(key) && !miss_keys.contains(key) {
                miss_queries.push(query.clone());
                miss_keys.push(key.clone());
            }
        }
        let mut from_storage: HashMap<String, Vec<Row>> = HashMap::new();
        if !miss_queries.is_empty() {
            let buckets = self.backing_store_find_multi(&miss_queries, &miss_keys)?;
            from_storage.extend(miss_keys.into_iter().zip(buckets));
        }

        let mut key_to_query: HashMap<String, Row> = HashMap::new();
        for (query, key) in queries.iter().zip(&keys) {
            if from_cache.contains_key(key) {
                key_to_query.entry(key.clone()).or_insert_with(|| query.clone());
            }
        }
        let filtered: HashMap<String, Vec<Row>> = from_cache
            .into_iter()
            .map(|(key, rows)| {
                let rows = self.policy.filter_results(rows, options);
                (key, rows)
            })
            .collect();
        let expanded = self.compactor.expand_cache_result(filtered, &key_to_query)?;

        Ok(keys
            .iter()
            .map(|key| match expanded.get(key) {
                Some(rows) => rows.clone(),
                None => from_storage
                    .get(key)
                    .map(|rows| self.policy.filter_results(rows.clone(), options))
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn found_multi(&self, queries: &[Row], options: &FindOptions) -> IndexResult<bool> {
        if queries.is_empty() {
            return Ok(true);
        }
        let keys = self.cache_keys(queries)?;
        if !keys.iter().all(|key| self.cache.has(key)) {
            return Ok(false);
        }

        let mut key_to_query: HashMap<String, Row> = HashMap::new();
        for (query, key) in queries.iter().zip(&keys) {
            key_to_query.entry(key.clone()).or_insert_with(|| query.clone());
        }
        let limit = options.limit.unwrap_or_else(|| self.policy.limit());
        let mut cached = self.cache.get_multi(&keys);
        for rows in cached.values_mut() {
            rows.truncate(limit);
        }
        self.compactor.found_expanded(&cached, &key_to_query)
    }

    fn cache_purge(&self, row: &Row) -> IndexResult<()> {
        let indexed = self.indexed_part(row)?;
        self.purge_bucket(&indexed);
        Ok(())
    }

    fn on_after_insert(&self, new: &Row, _metadata: &Metadata) -> IndexResult<()> {
        self.cache_purge(new)
    }

    fn on_after_update(&self, old: &Row, new: &Row, _metadata: &Metadata) -> IndexResult<()> {
        let old_indexed = self.indexed_part(old)?;
        let new_indexed = self.indexed_part(new)?;
        let same_bucket = rows_equal(&alphadecimal_ids(&old_indexed), &alphadecimal_ids(&new_indexed));
        if same_bucket {
            let old_compacted = self.compactor.compact_row(&alphadecimal_ids(old));
            let new_compacted = self.compactor.compact_row(&alphadecimal_ids(new));
            if rows_equal(&old_compacted, &new_compacted) {
                return Ok(());
            }
            self.purge_bucket(&old_indexed);
        } else {
            // the row moved between buckets
            self.purge_bucket(&old_indexed);
            self.purge_bucket(&new_indexed);
        }
        Ok(())
    }

    fn on_after_remove(&self, old: &Row, _metadata: &Metadata) -> IndexResult<()> {
        self.cache_purge(old)
    }

    /// Residency answers are only valid within one unit of work.
    fn on_after_clear(&self) -> IndexResult<()> {
        self.cache.clear_local();
        Ok(())
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for FeatureIndex<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIndex")
            .field("name", &self.name)
            .field("indexed", &self.indexed)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cache::{CacheConfig, InMemoryCacheBackend};
    use strata_store::InMemoryStorage;
    use strata_types::{row, BinaryId};

    struct Fixture {
        backend: Arc<InMemoryCacheBackend>,
        cache: Arc<ObjectCache>,
        storage: Arc<InMemoryStorage>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = Arc::new(ObjectCache::new(backend.clone(), CacheConfig::default()));
        let storage = Arc::new(InMemoryStorage::new(["post_id"]));
        Fixture { backend, cache, storage }
    }

    fn post(id: u128, topic: &str, title: &str) -> Row {
        row([
            ("post_id", Value::from(BinaryId::from_u128(id))),
            ("topic", Value::from(topic)),
            ("title", Value::from(title)),
        ])
    }

    fn seed(storage: &InMemoryStorage) {
        storage
            .insert(&[
                post(1, "a", "first"),
                post(2, "a", "second"),
                post(3, "b", "third"),
                post(4, "a", "fourth"),
            ])
            .unwrap();
    }

    fn by_topic(f: &Fixture) -> TopKIndex {
        TopKIndex::new(
            f.cache.clone(),
            f.storage.clone(),
            "post_by_topic",
            vec!["topic".into()],
            TopKOptions::sorted_by("post_id"),
        )
        .unwrap()
    }

    fn by_id(f: &Fixture) -> UniqueFeatureIndex {
        UniqueFeatureIndex::new(f.cache.clone(), f.storage.clone(), "post", vec!["post_id".into()])
    }

    fn ids(rows: &[Row]) -> Vec<u128> {
        rows.iter()
            .map(|r| r["post_id"].to_binary_id().unwrap().to_u128())
            .collect()
    }

    #[test]
    fn can_answer_matches_column_set_and_window() {
        let f = fixture();
        let index = by_topic(&f);
        let keys = vec!["topic".to_string()];
        assert!(index.can_answer(&keys, &FindOptions::new()));
        assert!(!index.can_answer(&["title".to_string()], &FindOptions::new()));
        assert!(index.can_answer(&keys, &FindOptions::new().with_limit(500)));
        assert!(!index.can_answer(&keys, &FindOptions::new().with_limit(400).with_offset(101)));
        assert!(!index.can_answer(&keys, &FindOptions::new().with_limit(usize::MAX).with_offset(2)));
        // sort and order must match when both are given
        let mismatched = FindOptions::new().sorted_by("title").with_order(SortOrder::Desc);
        assert!(!index.can_answer(&keys, &mismatched));
        let matched = FindOptions::new().sorted_by("post_id").with_order(SortOrder::Desc);
        assert!(index.can_answer(&keys, &matched));
        assert!(index.can_answer(&keys, &FindOptions::new().sorted_by("title")));
    }

    #[test]
    fn multi_column_keys_are_order_independent() {
        let f = fixture();
        let index = UniqueFeatureIndex::new(
            f.cache.clone(),
            f.storage.clone(),
            "pair",
            vec!["b".into(), "a".into()],
        );
        assert!(index.can_answer(&["a".into(), "b".into()], &FindOptions::new()));
        assert_eq!(index.limit(), 1);
        assert!(index.sort().is_none());
    }

    #[test]
    fn top_k_requires_sort() {
        let f = fixture();
        let err = TopKIndex::new(
            f.cache.clone(),
            f.storage.clone(),
            "bad",
            vec!["topic".into()],
            TopKOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[test]
    fn find_multi_preserves_order_across_cache_and_storage() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);

        // warm only topic b
        index.find(&row([("topic", "b")]), &FindOptions::new()).unwrap();
        let queries_before = f.storage.query_count();

        let results = index
            .find_multi(
                &[row([("topic", "a")]), row([("topic", "zzz")]), row([("topic", "b")])],
                &FindOptions::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(ids(&results[0]), vec![4, 2, 1]);
        assert!(results[1].is_empty());
        assert_eq!(ids(&results[2]), vec![3]);
        // topic b came from cache, with its indexed column restored
        assert_eq!(results[2][0]["topic"], Value::from("b"));
        assert_eq!(f.storage.query_count(), queries_before + 2);
    }

    #[test]
    fn repeated_queries_hit_storage_once() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        let results = index
            .find_multi(&[q.clone(), q.clone()], &FindOptions::new())
            .unwrap();
        assert_eq!(results[0], results[1]);
        assert_eq!(f.storage.query_count(), 1);

        let again = index.find(&q, &FindOptions::new()).unwrap();
        assert_eq!(again, results[0]);
        assert_eq!(f.storage.query_count(), 1);
    }

    #[test]
    fn empty_results_are_not_cached() {
        let f = fixture();
        let index = by_topic(&f);
        assert!(index.find(&row([("topic", "a")]), &FindOptions::new()).unwrap().is_empty());
        assert!(f.backend.is_empty());
        index.find(&row([("topic", "a")]), &FindOptions::new()).unwrap();
        assert_eq!(f.storage.query_count(), 2);
    }

    #[test]
    fn invalid_rows_are_not_cached() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = Arc::new(ObjectCache::new(backend.clone(), CacheConfig::default()));
        let storage = Arc::new(InMemoryStorage::new(["post_id"]).with_validator(|r| r["title"] != Value::from("draft")));
        storage.insert(&[post(1, "a", "draft")]).unwrap();
        let index = UniqueFeatureIndex::new(cache, storage, "post", vec!["post_id".into()]);
        let found = index
            .find(&row([("post_id", BinaryId::from_u128(1))]), &FindOptions::new())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(backend.is_empty());
    }

    #[test]
    fn unique_violation() {
        let f = fixture();
        seed(&f.storage);
        let index = UniqueFeatureIndex::new(f.cache.clone(), f.storage.clone(), "post_topic", vec!["topic".into()]);
        let err = index.find(&row([("topic", "a")]), &FindOptions::new()).unwrap_err();
        assert!(matches!(err, IndexError::UniqueViolation(_)));
    }

    #[test]
    fn mismatched_query_columns_are_rejected() {
        let f = fixture();
        let index = by_topic(&f);
        let err = index.find(&row([("title", "x")]), &FindOptions::new()).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedQuery(_)));
    }

    #[test]
    fn windows_by_limit_and_offset_id() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        // storage result, then cached result, must window identically
        for _ in 0..2 {
            let limited = index.find(&q, &FindOptions::new().with_limit(2)).unwrap();
            assert_eq!(ids(&limited), vec![4, 2]);

            let after = FindOptions::new().after(BinaryId::from_u128(4).to_alphadecimal());
            assert_eq!(ids(&index.find(&q, &after).unwrap()), vec![2, 1]);

            let including = FindOptions::new().after(BinaryId::from_u128(2)).including_offset();
            assert_eq!(ids(&index.find(&q, &including).unwrap()), vec![2, 1]);

            let past_end = FindOptions::new().after(BinaryId::from_u128(1));
            assert!(index.find(&q, &past_end).unwrap().is_empty());
        }
    }

    #[test]
    fn ascending_index_windows() {
        let f = fixture();
        seed(&f.storage);
        let index = TopKIndex::new(
            f.cache.clone(),
            f.storage.clone(),
            "post_by_topic_asc",
            vec!["topic".into()],
            TopKOptions::sorted_by("post_id").with_order(SortOrder::Asc).with_limit(2),
        )
        .unwrap();
        let q = row([("topic", "a")]);
        assert_eq!(ids(&index.find(&q, &FindOptions::new()).unwrap()), vec![1, 2]);
        let after = FindOptions::new().after(BinaryId::from_u128(1));
        assert_eq!(ids(&index.find(&q, &after).unwrap()), vec![2]);
    }

    #[test]
    fn write_events_purge_buckets() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        assert_eq!(index.find(&q, &FindOptions::new()).unwrap().len(), 3);

        let new = post(5, "a", "fifth");
        f.storage.insert(&[new.clone()]).unwrap();
        index.on_after_insert(&new, &Metadata::new()).unwrap();
        assert_eq!(ids(&index.find(&q, &FindOptions::new()).unwrap()), vec![5, 4, 2, 1]);

        // moving a row purges both buckets
        let moved = post(5, "b", "fifth");
        index.find(&row([("topic", "b")]), &FindOptions::new()).unwrap();
        f.storage.update(&new, &moved).unwrap();
        index.on_after_update(&new, &moved, &Metadata::new()).unwrap();
        assert_eq!(ids(&index.find(&q, &FindOptions::new()).unwrap()), vec![4, 2, 1]);
        assert_eq!(ids(&index.find(&row([("topic", "b")]), &FindOptions::new()).unwrap()), vec![5, 3]);

        f.storage.remove(&moved).unwrap();
        index.on_after_remove(&moved, &Metadata::new()).unwrap();
        assert_eq!(ids(&index.find(&row([("topic", "b")]), &FindOptions::new()).unwrap()), vec![3]);
    }

    #[test]
    fn unchanged_update_keeps_bucket() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        index.find(&q, &FindOptions::new()).unwrap();
        let key = index.cache_key(&q);
        let old = post(1, "a", "first");
        index.on_after_update(&old, &old.clone(), &Metadata::new()).unwrap();
        assert!(f.cache.has(&key));

        let retitled = post(1, "a", "renamed");
        index.on_after_update(&old, &retitled, &Metadata::new()).unwrap();
        assert!(!f.cache.has(&key));
    }

    #[test]
    fn unindexable_rows_error() {
        let f = fixture();
        let index = by_topic(&f);
        let err = index.cache_purge(&row([("title", "x")])).unwrap_err();
        assert!(matches!(err, IndexError::Unindexable(_)));
    }

    #[test]
    fn found_reports_local_residency() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        assert!(!index.found(&q, &FindOptions::new()).unwrap());
        index.find(&q, &FindOptions::new()).unwrap();
        assert!(index.found(&q, &FindOptions::new()).unwrap());
        assert!(index.found_multi(&[], &FindOptions::new()).unwrap());
    }

    #[test]
    fn cache_key_is_stable_across_id_representations() {
        let f = fixture();
        let index = by_id(&f);
        let id = BinaryId::from_u128(42);
        let raw = index.cache_key(&row([("post_id", id)]));
        let text = index.cache_key(&row([("post_id", id.to_alphadecimal())]));
        assert_eq!(raw, text);
        assert!(raw.starts_with("global:post:default:"));
        assert!(raw.ends_with(":1"));
    }

    #[test]
    fn purge_from_another_process_is_observed() {
        let f = fixture();
        seed(&f.storage);
        let here = by_topic(&f);
        let elsewhere_cache = Arc::new(ObjectCache::new(f.backend.clone(), CacheConfig::default()));
        let elsewhere = TopKIndex::new(
            elsewhere_cache,
            f.storage.clone(),
            "post_by_topic",
            vec!["topic".into()],
            TopKOptions::sorted_by("post_id"),
        )
        .unwrap();
        let q = row([("topic", "a")]);
        assert_eq!(here.find(&q, &FindOptions::new()).unwrap().len(), 3);

        let fresh = post(5, "a", "fifth");
        f.storage.insert(&[fresh.clone()]).unwrap();
        elsewhere.on_after_insert(&fresh, &Metadata::new()).unwrap();
        assert!(f.backend.is_empty());

        assert_eq!(ids(&here.find(&q, &FindOptions::new()).unwrap()), vec![5, 4, 2, 1]);
    }

    #[test]
    fn clear_ends_residency() {
        let f = fixture();
        seed(&f.storage);
        let index = by_topic(&f);
        let q = row([("topic", "a")]);
        index.find(&q, &FindOptions::new()).unwrap();
        assert!(index.found(&q, &FindOptions::new()).unwrap());
        index.on_after_clear().unwrap();
        assert!(!index.found(&q, &FindOptions::new()).unwrap());
        // the shared entry survives and is read back without storage
        index.find(&q, &FindOptions::new()).unwrap();
        assert_eq!(f.storage.query_count(), 1);
    }

    #[test]
    fn cache_outage_falls_through_to_storage() {
        let f = fixture();
        seed(&f.storage);
        f.backend.set_available(false);
        let index = by_topic(&f);
        let found = index.find(&row([("topic", "a")]), &FindOptions::new()).unwrap();
        assert_eq!(ids(&found), vec![4, 2, 1]);
    }

    #[test]
    fn shallow_index_expands_through_unique_index() {
        let f = fixture();
        seed(&f.storage);
        let unique = Arc::new(by_id(&f));
        let shallow = by_topic(&f).shallow(unique.clone());
        let q = row([("topic", "a")]);

        let first = shallow.find(&q, &FindOptions::new()).unwrap();
        assert_eq!(ids(&first), vec![4, 2, 1]);
        // cached entries hold only the key columns
        let cached = f.cache.get(&shallow.cache_key(&q)).unwrap();
        assert!(cached.iter().all(|r| r.len() == 1 && r.contains_key("post_id")));

        // found needs the referenced rows resident too
        assert!(!shallow.found(&q, &FindOptions::new()).unwrap());
        let second = shallow.find(&q, &FindOptions::new().with_limit(2)).unwrap();
        assert_eq!(ids(&second), vec![4, 2]);
        assert_eq!(second[0]["title"], Value::from("fourth"));
        assert!(shallow.found(&q, &FindOptions::new().with_limit(2)).unwrap());
    }
}
