//! The write path.
//!
//! An [`ObjectManager`] extends its [`ObjectLocator`] with an identity map
//! recording the last-known row of every object it loaded or merged. That
//! map decides whether `put` inserts or updates, and supplies the old row
//! for diffing, removal and cache purges.
//!
//! Tracked object lifecycle:
//!
//! ```text
//! UNTRACKED --load/merge/insert--> TRACKED --update*--> TRACKED --remove--> UNTRACKED
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use strata_index::{Index, LifecycleHandler};
use strata_store::ObjectStorage;
use strata_types::{rows_equal, FindOptions, Metadata, ObjectRef, Row};
use tracing::{debug, trace, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::identity::IdentityMap;
use crate::locator::{ObjectLocator, PrimaryKey};
use crate::mapper::{Model, ObjectMapper};

/// Persists objects of type `T`, keeping indexes and handlers informed.
///
/// One manager serves one unit of work; call [`ObjectManager::clear`] at
/// its boundary.
pub struct ObjectManager<T> {
    locator: ObjectLocator<T>,
    loaded: RwLock<IdentityMap<T>>,
}

impl<T: Model> ObjectManager<T> {
    /// Indexes are notified of writes before `handlers`, in registration
    /// order.
    pub fn new(
        mapper: Arc<dyn ObjectMapper<T>>,
        storage: Arc<dyn ObjectStorage>,
        indexes: Vec<Arc<dyn Index>>,
        handlers: Vec<Arc<dyn LifecycleHandler<T>>>,
    ) -> Self {
        Self {
            locator: ObjectLocator::new(mapper, storage, indexes, handlers),
            loaded: RwLock::new(IdentityMap::new()),
        }
    }

    /// The read path this manager extends.
    pub fn locator(&self) -> &ObjectLocator<T> {
        &self.locator
    }

    /// Whether `object` has a last-known row in this manager.
    pub fn is_tracked(&self, object: &ObjectRef<T>) -> bool {
        self.read_loaded().contains(object)
    }

    /// Last-known row of `object`.
    pub fn loaded_row(&self, object: &ObjectRef<T>) -> Option<Row> {
        self.read_loaded().get(object).cloned()
    }

    fn read_loaded(&self) -> std::sync::RwLockReadGuard<'_, IdentityMap<T>> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_loaded(&self) -> std::sync::RwLockWriteGuard<'_, IdentityMap<T>> {
        self.loaded.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, object: &ObjectRef<T>, row: &Row) {
        self.write_loaded().insert(object, row.clone());
    }

    fn tracked_row(&self, object: &ObjectRef<T>) -> ManagerResult<Row> {
        self.loaded_row(object)
            .ok_or(ManagerError::NotTracked { class: T::CLASS })
    }

    // ---------------------------------------------------------------
    // Reads (loaded objects become tracked)
    // ---------------------------------------------------------------

    /// Like [`ObjectLocator::find`], tracking every loaded object.
    pub fn find(&self, query: &Row, options: &FindOptions) -> ManagerResult<Vec<ObjectRef<T>>> {
        let mut results = self.find_multi(std::slice::from_ref(query), options)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Like [`ObjectLocator::find_multi`], tracking every loaded object.
    pub fn find_multi(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<Vec<Vec<ObjectRef<T>>>> {
        self.locator
            .find_multi_with(queries, options, &|object, row| self.track(object, row))
    }

    /// See [`ObjectLocator::found`].
    pub fn found(&self, query: &Row, options: &FindOptions) -> ManagerResult<bool> {
        self.locator.found(query, options)
    }

    /// See [`ObjectLocator::found_multi`].
    pub fn found_multi(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<bool> {
        self.locator.found_multi(queries, options)
    }

    /// Like [`ObjectLocator::get`], tracking the loaded object.
    pub fn get(&self, id: impl Into<PrimaryKey>) -> ManagerResult<Option<ObjectRef<T>>> {
        let mut found = self.get_multi(&[id.into()])?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    /// See [`ObjectLocator::get_multi`] for the result order.
    pub fn get_multi(&self, ids: &[PrimaryKey]) -> ManagerResult<Vec<ObjectRef<T>>> {
        self.locator
            .get_multi_with(ids, &|object, row| self.track(object, row))
    }

    /// See [`ObjectLocator::got`].
    pub fn got(&self, id: impl Into<PrimaryKey>) -> ManagerResult<bool> {
        self.locator.got(id)
    }

    /// See [`ObjectLocator::got_multi`].
    pub fn got_multi(&self, ids: &[PrimaryKey]) -> ManagerResult<bool> {
        self.locator.got_multi(ids)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Start tracking an object obtained elsewhere, so the next `put`
    /// updates instead of inserting. No-op if already tracked.
    pub fn merge(&self, object: &ObjectRef<T>) {
        if self.is_tracked(object) {
            return;
        }
        let row = self.locator.mapper().to_storage_row(object);
        self.track(object, &row);
    }

    /// Insert `object`, or update it if tracked. See
    /// [`ObjectManager::multi_put`].
    pub fn put(&self, object: &ObjectRef<T>, metadata: &Metadata) -> ManagerResult<()> {
        self.multi_put(std::slice::from_ref(object), metadata)
    }

    /// Update tracked objects one by one, then insert the rest in a single
    /// storage call.
    pub fn multi_put(&self, objects: &[ObjectRef<T>], metadata: &Metadata) -> ManagerResult<()> {
        let (updates, inserts): (Vec<&ObjectRef<T>>, Vec<&ObjectRef<T>>) =
            objects.iter().partition(|object| self.is_tracked(object));
        for object in updates {
            self.update_single(object, metadata)?;
        }
        if !inserts.is_empty() {
            self.insert(&inserts, metadata)?;
        }
        Ok(())
    }

    fn insert(&self, objects: &[&ObjectRef<T>], metadata: &Metadata) -> ManagerResult<()> {
        let mapper = self.locator.mapper();
        let rows: Vec<Row> = objects.iter().map(|object| mapper.to_storage_row(object)).collect();
        let stored = self
            .locator
            .storage()
            .insert(&rows)
            .map_err(|e| ManagerError::InsertFailed(e.to_string()))?;
        if stored.len() != objects.len() {
            return Err(ManagerError::InsertFailed(format!(
                "store returned {} rows for {} objects",
                stored.len(),
                objects.len()
            )));
        }
        debug!(class = T::CLASS, count = objects.len(), "inserted");

        for (object, row) in objects.iter().zip(&stored) {
            mapper.from_storage_row(row, Some(*object))?;
            for handler in self.locator.handlers() {
                handler.on_after_insert(object, row, metadata)?;
            }
            self.track(object, row);
        }
        Ok(())
    }

    fn update_single(&self, object: &ObjectRef<T>, metadata: &Metadata) -> ManagerResult<()> {
        let mapper = self.locator.mapper();
        let old = mapper.normalize_row(&self.tracked_row(object)?)?;
        let new = mapper.to_storage_row(object);
        if rows_equal(&old, &new) {
            trace!(class = T::CLASS, "unchanged, skipping update");
            return Ok(());
        }
        if !self.locator.storage().update(&old, &new)? {
            warn!(class = T::CLASS, "store reported no row updated");
        }
        for handler in self.locator.handlers() {
            handler.on_after_update(object, &old, &new, metadata)?;
        }
        self.track(object, &new);
        Ok(())
    }

    /// Remove a tracked object. Fails with [`ManagerError::NotTracked`] if
    /// the object was never loaded or merged.
    pub fn remove(&self, object: &ObjectRef<T>, metadata: &Metadata) -> ManagerResult<()> {
        let old = self.locator.mapper().normalize_row(&self.tracked_row(object)?)?;
        if !self.locator.storage().remove(&old)? {
            warn!(class = T::CLASS, "store reported no row removed");
        }
        for handler in self.locator.handlers() {
            handler.on_after_remove(object, &old, metadata)?;
        }
        self.write_loaded().remove(object);
        Ok(())
    }

    /// Remove each object in turn, stopping at the first failure.
    pub fn multi_remove(&self, objects: &[ObjectRef<T>], metadata: &Metadata) -> ManagerResult<()> {
        for object in objects {
            self.remove(object, metadata)?;
        }
        Ok(())
    }

    /// Invalidate every index entry that could hold `object`'s last-known
    /// row, without writing.
    pub fn cache_purge(&self, object: &ObjectRef<T>) -> ManagerResult<()> {
        let row = self.tracked_row(object)?;
        for index in self.locator.indexes() {
            index.cache_purge(&row)?;
        }
        Ok(())
    }

    /// End the unit of work: forget tracked objects and mapper state, then
    /// notify handlers.
    pub fn clear(&self) -> ManagerResult<()> {
        self.write_loaded().clear();
        self.locator.clear()
    }

    /// Pagination token for `object`: the values of `sort_fields` in its
    /// current row joined with `|`, identifiers in alphadecimal form.
    pub fn serialize_offset(&self, object: &ObjectRef<T>, sort_fields: &[String]) -> ManagerResult<String> {
        let row = self.locator.mapper().to_storage_row(object);
        let fields = sort_fields
            .iter()
            .map(|field| {
                let value = row
                    .get(field)
                    .ok_or_else(|| ManagerError::InvalidOffset(format!("no column {field}")))?;
                if field.ends_with("_id") {
                    if let Ok(id) = value.to_binary_id() {
                        return Ok(id.to_alphadecimal());
                    }
                }
                Ok(value.to_string())
            })
            .collect::<ManagerResult<Vec<String>>>()?;
        Ok(fields.join("|"))
    }
}

impl<T> std::fmt::Debug for ObjectManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("locator", &self.locator)
            .field("loaded", &self.loaded)
            .finish()
    }
}
