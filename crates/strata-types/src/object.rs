//! Shared handles to domain objects.
//!
//! The persistence layer tracks objects by *identity*, not by value: two
//! structurally equal objects are still two objects. [`ObjectRef`] is the
//! handle callers hold; its [`ObjectIdentity`] is stable for as long as any
//! strong or weak handle to the allocation exists, so a table keyed by
//! identity and holding only [`WeakObjectRef`]s never confuses a dropped
//! object with a new one and never keeps an object alive.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Identity of an object allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity(usize);

/// Strong, cloneable handle to a domain object.
pub struct ObjectRef<T>(Arc<RwLock<T>>);

impl<T> ObjectRef<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Shared access to the object.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the object.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity(Arc::as_ptr(&self.0) as *const () as usize)
    }

    /// Returns `true` if both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef<T> {
        WeakObjectRef(Arc::downgrade(&self.0))
    }
}

impl<T: Send + Sync + 'static> ObjectRef<T> {
    /// Erase the object type, tagging the handle with its domain class.
    pub fn to_any(&self, class: &'static str) -> AnyObject {
        AnyObject {
            class,
            inner: self.0.clone(),
        }
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef").field(&*self.read()).finish()
    }
}

/// Non-owning handle; does not keep the object alive.
pub struct WeakObjectRef<T>(Weak<RwLock<T>>);

impl<T> WeakObjectRef<T> {
    pub fn upgrade(&self) -> Option<ObjectRef<T>> {
        self.0.upgrade().map(ObjectRef)
    }

    /// Identity of the allocation. Stays valid (and unique) while this
    /// weak handle exists, even after the object itself was dropped.
    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity(Weak::as_ptr(&self.0) as *const () as usize)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<T> Clone for WeakObjectRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Type-erased object handle tagged with its domain class name, used to
/// route mixed batches to per-class managers.
#[derive(Clone)]
pub struct AnyObject {
    class: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl AnyObject {
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// Recover the typed handle. Returns `None` if `T` is not the type the
    /// handle was created from.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<ObjectRef<T>> {
        self.inner.clone().downcast::<RwLock<T>>().ok().map(ObjectRef)
    }
}

impl fmt::Debug for AnyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyObject").field("class", &self.class).finish()
    }
}
