use std::collections::HashMap;

use strata_types::{ObjectIdentity, ObjectRef, Row, WeakObjectRef};

/// Last-known storage row of every object a manager has loaded or merged,
/// keyed by object identity.
///
/// Entries hold weak handles only: the map never keeps an object alive,
/// and an entry whose object has been dropped is pruned on the next write.
/// While the entry exists its identity cannot be reused by a new object.
pub struct IdentityMap<T> {
    entries: HashMap<ObjectIdentity, (WeakObjectRef<T>, Row)>,
}

impl<T> IdentityMap<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, object: &ObjectRef<T>) -> Option<&Row> {
        self.entries
            .get(&object.identity())
            .filter(|(weak, _)| weak.is_alive())
            .map(|(_, row)| row)
    }

    pub fn contains(&self, object: &ObjectRef<T>) -> bool {
        self.get(object).is_some()
    }

    /// Record `row` for `object`, replacing any previous row.
    pub fn insert(&mut self, object: &ObjectRef<T>, row: Row) {
        self.prune();
        self.entries
            .insert(object.identity(), (object.downgrade(), row));
    }

    pub fn remove(&mut self, object: &ObjectRef<T>) -> Option<Row> {
        self.entries.remove(&object.identity()).map(|(_, row)| row)
    }

    /// Number of tracked objects that are still alive.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|(weak, _)| weak.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self) {
        self.entries.retain(|_, (weak, _)| weak.is_alive());
    }
}

impl<T> Default for IdentityMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for IdentityMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("tracked", &self.len())
            .finish()
    }
}
