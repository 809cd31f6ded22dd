//! The read path: index selection, storage fallback and materialization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_index::{Index, IndexError, IndexListener, LifecycleHandler};
use strata_store::ObjectStorage;
use strata_types::{
    BinaryId, Comparison, Condition, FindOptions, ObjectRef, Row, SortOrder, StorageOptions,
    StorageQuery, Value,
};
use tracing::debug;

use crate::error::{ManagerError, ManagerResult};
use crate::mapper::{Model, ObjectMapper};

/// Primary key values, in the store's primary key column order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrimaryKey(pub Vec<Value>);

impl From<Value> for PrimaryKey {
    fn from(v: Value) -> Self {
        Self(vec![v])
    }
}

impl From<BinaryId> for PrimaryKey {
    fn from(id: BinaryId) -> Self {
        Self(vec![Value::from(id)])
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        Self(vec![Value::Int(v)])
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        Self(vec![Value::from(v)])
    }
}

impl From<Vec<Value>> for PrimaryKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Materialization callback, run after the lifecycle handlers saw the load.
pub(crate) type OnLoad<'a, T> = &'a dyn Fn(&ObjectRef<T>, &Row);

/// Finds objects of type `T` through the best available index, falling
/// back to the backing store when no index can answer.
pub struct ObjectLocator<T> {
    mapper: Arc<dyn ObjectMapper<T>>,
    storage: Arc<dyn ObjectStorage>,
    indexes: Vec<Arc<dyn Index>>,
    handlers: Vec<Arc<dyn LifecycleHandler<T>>>,
    fallbacks: AtomicUsize,
}

impl<T: Model> ObjectLocator<T> {
    /// Indexes are registered as lifecycle handlers ahead of `handlers`.
    pub fn new(
        mapper: Arc<dyn ObjectMapper<T>>,
        storage: Arc<dyn ObjectStorage>,
        indexes: Vec<Arc<dyn Index>>,
        handlers: Vec<Arc<dyn LifecycleHandler<T>>>,
    ) -> Self {
        let mut all: Vec<Arc<dyn LifecycleHandler<T>>> = indexes
            .iter()
            .map(|index| Arc::new(IndexListener::new(index.clone())) as Arc<dyn LifecycleHandler<T>>)
            .collect();
        all.extend(handlers);
        Self {
            mapper,
            storage,
            indexes,
            handlers: all,
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// The mapper materializing loaded rows.
    pub fn mapper(&self) -> &Arc<dyn ObjectMapper<T>> {
        &self.mapper
    }

    /// The backing store queried when no index can answer.
    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// Registered indexes, in registration order.
    pub fn indexes(&self) -> &[Arc<dyn Index>] {
        &self.indexes
    }

    /// Index listeners first, then the extra handlers.
    pub fn handlers(&self) -> &[Arc<dyn LifecycleHandler<T>>] {
        &self.handlers
    }

    /// Primary key columns of the backing store.
    pub fn primary_key_columns(&self) -> &[String] {
        self.storage.primary_key_columns()
    }

    /// How often a query found no index and went to the backing store.
    pub fn no_index_fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------
    // Index selection
    // ---------------------------------------------------------------

    /// Pick the index for a query on `keys`.
    ///
    /// Among indexes that can answer, a query with a limit gets the one
    /// with the smallest limit, a query without one the largest. Ties go
    /// to the first registered.
    pub fn index_for(&self, keys: &[String], options: &FindOptions) -> Result<Arc<dyn Index>, IndexError> {
        let mut keys = keys.to_vec();
        keys.sort();
        let mut current: Option<&Arc<dyn Index>> = None;
        for index in &self.indexes {
            if !index.can_answer(&keys, options) {
                continue;
            }
            current = match current {
                None => Some(index),
                Some(best) if options.limit.is_some() && index.limit() < best.limit() => Some(index),
                Some(best) if options.limit.is_none() && index.limit() > best.limit() => Some(index),
                keep => keep,
            };
        }
        current.cloned().ok_or_else(|| IndexError::NoIndex {
            keys: keys.join(", "),
            options: serde_json::to_string(options).unwrap_or_default(),
            available: self.indexes.len(),
        })
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Objects matching one equality query. See [`ObjectLocator::find_multi`].
    pub fn find(&self, query: &Row, options: &FindOptions) -> ManagerResult<Vec<ObjectRef<T>>> {
        let mut results = self.find_multi(std::slice::from_ref(query), options)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// One result list per query, in input order. All queries must use the
    /// same columns as the first.
    pub fn find_multi(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<Vec<Vec<ObjectRef<T>>>> {
        self.find_multi_with(queries, options, &|_, _| {})
    }

    pub(crate) fn find_multi_with(
        &self,
        queries: &[Row],
        options: &FindOptions,
        on_load: OnLoad<'_, T>,
    ) -> ManagerResult<Vec<Vec<ObjectRef<T>>>> {
        let Some(first) = queries.first() else {
            return Ok(Vec::new());
        };
        let keys: Vec<String> = first.keys().cloned().collect();

        let rows = match self.index_for(&keys, options) {
            Ok(index) => index.find_multi(queries, options)?,
            Err(e @ IndexError::NoIndex { .. }) => {
                self.record_fallback(&e);
                self.storage.find_multi(
                    &self.convert_to_storage_queries(queries, options)?,
                    &StorageOptions::from_find_options(options),
                )?
            }
            Err(e) => return Err(e.into()),
        };

        rows.iter()
            .map(|bucket| bucket.iter().map(|row| self.load(row, on_load)).collect())
            .collect()
    }

    /// Whether [`ObjectLocator::find`] would be answered from resident
    /// cache entries.
    pub fn found(&self, query: &Row, options: &FindOptions) -> ManagerResult<bool> {
        self.found_multi(std::slice::from_ref(query), options)
    }

    /// Whether [`ObjectLocator::find_multi`] could be answered without
    /// touching the shared cache or the store. `false` when no index can
    /// answer.
    pub fn found_multi(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<bool> {
        let Some(first) = queries.first() else {
            return Ok(true);
        };
        let keys: Vec<String> = first.keys().cloned().collect();
        match self.index_for(&keys, options) {
            Ok(index) => Ok(index.found_multi(queries, options)?),
            Err(e @ IndexError::NoIndex { .. }) => {
                debug!(error = %e, "no index to check residency");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---------------------------------------------------------------
    // Primary key lookups
    // ---------------------------------------------------------------

    /// The object with primary key `id`, if it exists.
    pub fn get(&self, id: impl Into<PrimaryKey>) -> ManagerResult<Option<ObjectRef<T>>> {
        let mut found = self.get_multi(&[id.into()])?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    /// Objects for `ids`. Objects the mapper already holds come first, then
    /// freshly loaded ones; the result is not in `ids` order and omits ids
    /// that do not exist.
    pub fn get_multi(&self, ids: &[PrimaryKey]) -> ManagerResult<Vec<ObjectRef<T>>> {
        self.get_multi_with(ids, &|_, _| {})
    }

    pub(crate) fn get_multi_with(&self, ids: &[PrimaryKey], on_load: OnLoad<'_, T>) -> ManagerResult<Vec<ObjectRef<T>>> {
        let mut found = Vec::new();
        let mut queries = Vec::new();
        for id in ids {
            let query = self.primary_key_query(id)?;
            match self.mapper.get(&query) {
                Some(object) => found.push(object),
                None => queries.push(query),
            }
        }
        if !queries.is_empty() {
            let loaded = self.find_multi_with(&queries, &FindOptions::default(), on_load)?;
            found.extend(loaded.into_iter().filter_map(|mut bucket| {
                if bucket.is_empty() {
                    None
                } else {
                    Some(bucket.swap_remove(0))
                }
            }));
        }
        Ok(found)
    }

    /// Whether [`ObjectLocator::get`] would be answered without I/O.
    pub fn got(&self, id: impl Into<PrimaryKey>) -> ManagerResult<bool> {
        self.got_multi(&[id.into()])
    }

    /// Whether [`ObjectLocator::get_multi`] would be answered without I/O.
    pub fn got_multi(&self, ids: &[PrimaryKey]) -> ManagerResult<bool> {
        let mut queries = Vec::new();
        for id in ids {
            let query = self.primary_key_query(id)?;
            if self.mapper.get(&query).is_none() {
                queries.push(query);
            }
        }
        if !queries.is_empty() && self.mapper.is_caching() {
            return Ok(false);
        }
        self.found_multi(&queries, &FindOptions::default())
    }

    /// Forget mapper state and notify handlers.
    pub fn clear(&self) -> ManagerResult<()> {
        self.mapper.clear();
        for handler in &self.handlers {
            handler.on_after_clear()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn load(&self, row: &Row, on_load: OnLoad<'_, T>) -> ManagerResult<ObjectRef<T>> {
        let object = self.mapper.from_storage_row(row, None)?;
        for handler in &self.handlers {
            handler.on_after_load(&object, row)?;
        }
        on_load(&object, row);
        Ok(object)
    }

    fn record_fallback(&self, error: &IndexError) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        let indexes: Vec<&str> = self.indexes.iter().map(|index| index.name()).collect();
        debug!(
            class = T::CLASS,
            error = %error,
            indexes = ?indexes,
            "no index available, querying storage"
        );
    }

    fn primary_key_query(&self, id: &PrimaryKey) -> ManagerResult<Row> {
        let columns = self.primary_key_columns();
        if columns.len() != id.0.len() {
            return Err(ManagerError::InvalidPrimaryKey {
                expected: columns.len(),
                actual: id.0.len(),
            });
        }
        Ok(columns.iter().cloned().zip(id.0.iter().cloned()).collect())
    }

    /// Equality queries plus, for an `offset_id` on a single `_id` sort
    /// column, the cursor condition on that column.
    fn convert_to_storage_queries(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<Vec<StorageQuery>> {
        let cursor = match (&options.offset_id, options.sort.as_slice()) {
            (Some(offset_id), [column]) if column.ends_with("_id") => {
                let id = offset_id
                    .to_binary_id()
                    .map_err(|e| ManagerError::InvalidOffset(e.to_string()))?;
                let op = match (options.order, options.offset_include) {
                    (Some(SortOrder::Asc), false) => Comparison::Gt,
                    (Some(SortOrder::Asc), true) => Comparison::Ge,
                    (_, false) => Comparison::Lt,
                    (_, true) => Comparison::Le,
                };
                Some(Condition {
                    column: column.clone(),
                    op,
                    value: Value::from(id),
                })
            }
            _ => None,
        };
        Ok(queries
            .iter()
            .map(|query| {
                let storage_query = StorageQuery::new(query.clone());
                match &cursor {
                    Some(condition) => storage_query.with_condition(condition.clone()),
                    None => storage_query,
                }
            })
            .collect())
    }
}

impl<T> std::fmt::Debug for ObjectLocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let indexes: Vec<&str> = self.indexes.iter().map(|index| index.name()).collect();
        f.debug_struct("ObjectLocator")
            .field("indexes", &indexes)
            .field("handlers", &self.handlers.len())
            .field("no_index_fallbacks", &self.fallbacks.load(Ordering::Relaxed))
            .finish()
    }
}
