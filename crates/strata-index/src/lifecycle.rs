//! Write-event notification.
//!
//! Managers hold one ordered list of [`LifecycleHandler`]s, built once at
//! construction: an [`IndexListener`] per registered index first, then any
//! external handlers. Indexes therefore observe every event before
//! listeners that may read from their caches.

use std::sync::Arc;

use strata_types::{Metadata, ObjectRef, Row};

use crate::error::IndexResult;
use crate::traits::Index;

/// Receives notifications about objects of type `T`.
///
/// `metadata` is supplied by the caller of the write and passed through
/// untouched.
pub trait LifecycleHandler<T>: Send + Sync {
    /// An object was materialized from `row`.
    fn on_after_load(&self, object: &ObjectRef<T>, row: &Row) -> IndexResult<()>;

    /// An object was inserted; `new` includes store-assigned values.
    fn on_after_insert(&self, object: &ObjectRef<T>, new: &Row, metadata: &Metadata)
        -> IndexResult<()>;

    /// An object was updated. Only fired when `old` and `new` differ.
    fn on_after_update(
        &self,
        object: &ObjectRef<T>,
        old: &Row,
        new: &Row,
        metadata: &Metadata,
    ) -> IndexResult<()>;

    fn on_after_remove(&self, object: &ObjectRef<T>, old: &Row, metadata: &Metadata)
        -> IndexResult<()>;

    /// The owning manager's unit of work was reset.
    fn on_after_clear(&self) -> IndexResult<()> {
        Ok(())
    }
}

/// Forwards lifecycle events to an [`Index`]. Indexes only need the rows,
/// so one listener serves managers of any object type.
#[derive(Clone)]
pub struct IndexListener {
    index: Arc<dyn Index>,
}

impl IndexListener {
    pub fn new(index: Arc<dyn Index>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }
}

impl<T> LifecycleHandler<T> for IndexListener {
    fn on_after_load(&self, _object: &ObjectRef<T>, row: &Row) -> IndexResult<()> {
        self.index.on_after_load(row)
    }

    fn on_after_insert(&self, _object: &ObjectRef<T>, new: &Row, metadata: &Metadata) -> IndexResult<()> {
        self.index.on_after_insert(new, metadata)
    }

    fn on_after_update(
        &self,
        _object: &ObjectRef<T>,
        old: &Row,
        new: &Row,
        metadata: &Metadata,
    ) -> IndexResult<()> {
        self.index.on_after_update(old, new, metadata)
    }

    fn on_after_remove(&self, _object: &ObjectRef<T>, old: &Row, metadata: &Metadata) -> IndexResult<()> {
        self.index.on_after_remove(old, metadata)
    }

    fn on_after_clear(&self) -> IndexResult<()> {
        self.index.on_after_clear()
    }
}

impl std::fmt::Debug for IndexListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexListener")
            .field("index", &self.index.name())
            .finish()
    }
}
