//! Routing by domain class.
//!
//! A [`ManagerGroup`] maps domain class names to services in a
//! [`ManagerContainer`], builds managers lazily, and remembers which ones
//! were used so [`ManagerGroup::clear`] only resets those.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use strata_types::{AnyObject, FindOptions, Metadata, ObjectRef, Row};
use tracing::{debug, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::locator::PrimaryKey;
use crate::manager::ObjectManager;
use crate::mapper::Model;

/// Type-erased view of an [`ObjectManager`], for mixed-class batches.
pub trait ManagedStorage: Send + Sync {
    fn class_name(&self) -> &'static str;

    fn multi_put_any(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()>;

    fn multi_remove_any(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()>;

    fn cache_purge_any(&self, object: &AnyObject) -> ManagerResult<()>;

    fn clear(&self) -> ManagerResult<()>;
}

fn downcast_all<T: Model>(objects: &[AnyObject]) -> ManagerResult<Vec<ObjectRef<T>>> {
    objects.iter().map(downcast_one).collect()
}

fn downcast_one<T: Model>(object: &AnyObject) -> ManagerResult<ObjectRef<T>> {
    object.downcast::<T>().ok_or_else(|| ManagerError::WrongClass {
        expected: T::CLASS,
        actual: object.class().to_string(),
    })
}

impl<T: Model> ManagedStorage for ObjectManager<T> {
    fn class_name(&self) -> &'static str {
        T::CLASS
    }

    fn multi_put_any(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()> {
        self.multi_put(&downcast_all::<T>(objects)?, metadata)
    }

    fn multi_remove_any(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()> {
        self.multi_remove(&downcast_all::<T>(objects)?, metadata)
    }

    fn cache_purge_any(&self, object: &AnyObject) -> ManagerResult<()> {
        self.cache_purge(&downcast_one::<T>(object)?)
    }

    fn clear(&self) -> ManagerResult<()> {
        ObjectManager::clear(self)
    }
}

struct ManagerEntry {
    erased: Arc<dyn ManagedStorage>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl ManagerEntry {
    fn new<T: Model>(manager: Arc<ObjectManager<T>>) -> Self {
        Self {
            erased: manager.clone(),
            typed: manager,
        }
    }
}

type Factory = Box<dyn Fn() -> ManagerResult<ManagerEntry> + Send + Sync>;

struct Service {
    factory: Factory,
    instance: OnceLock<ManagerEntry>,
}

/// Named, lazily constructed managers.
#[derive(Default)]
pub struct ManagerContainer {
    services: BTreeMap<String, Service>,
}

impl ManagerContainer {
    /// An empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, run at most once on first use.
    pub fn register<T, F>(&mut self, service: impl Into<String>, factory: F)
    where
        T: Model,
        F: Fn() -> ManagerResult<ObjectManager<T>> + Send + Sync + 'static,
    {
        let factory: Factory = Box::new(move || Ok(ManagerEntry::new(Arc::new(factory()?))));
        self.services.insert(
            service.into(),
            Service {
                factory,
                instance: OnceLock::new(),
            },
        );
    }

    /// Register an already built manager.
    pub fn register_instance<T: Model>(&mut self, service: impl Into<String>, manager: Arc<ObjectManager<T>>) {
        let factory: Factory = Box::new(move || Ok(ManagerEntry::new(manager.clone())));
        self.services.insert(
            service.into(),
            Service {
                factory,
                instance: OnceLock::new(),
            },
        );
    }

    /// Whether a service is registered under this name.
    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Whether the service's manager has been built.
    pub fn is_built(&self, service: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|s| s.instance.get().is_some())
    }

    fn resolve(&self, service: &str) -> ManagerResult<&ManagerEntry> {
        let entry = self
            .services
            .get(service)
            .ok_or_else(|| ManagerError::MissingService(service.to_string()))?;
        if let Some(built) = entry.instance.get() {
            return Ok(built);
        }
        let built = (entry.factory)()?;
        Ok(entry.instance.get_or_init(|| built))
    }
}

/// Routes operations to the manager of each object's domain class.
pub struct ManagerGroup {
    container: ManagerContainer,
    class_map: BTreeMap<String, String>,
    used: RwLock<BTreeSet<String>>,
}

impl ManagerGroup {
    /// `class_map` maps domain class names to container service names.
    pub fn new<I, C, S>(container: ManagerContainer, class_map: I) -> Self
    where
        I: IntoIterator<Item = (C, S)>,
        C: Into<String>,
        S: Into<String>,
    {
        Self {
            container,
            class_map: class_map
                .into_iter()
                .map(|(class, service)| (class.into(), service.into()))
                .collect(),
            used: RwLock::new(BTreeSet::new()),
        }
    }

    /// Services touched since the last [`ManagerGroup::clear`].
    pub fn used_services(&self) -> Vec<String> {
        self.used
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn entry(&self, class: &str) -> ManagerResult<&ManagerEntry> {
        let service = self.class_map.get(class).ok_or_else(|| ManagerError::UnknownClass {
            class: class.to_string(),
            known: self.class_map.keys().cloned().collect::<Vec<_>>().join(", "),
        })?;
        let entry = self.container.resolve(service)?;
        self.used
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.clone());
        Ok(entry)
    }

    /// The typed manager for `T`.
    pub fn storage<T: Model>(&self) -> ManagerResult<Arc<ObjectManager<T>>> {
        let entry = self.entry(T::CLASS)?;
        entry
            .typed
            .clone()
            .downcast::<ObjectManager<T>>()
            .map_err(|_| ManagerError::WrongClass {
                expected: T::CLASS,
                actual: entry.erased.class_name().to_string(),
            })
    }

    /// The type-erased manager for a domain class name.
    pub fn storage_by_class(&self, class: &str) -> ManagerResult<Arc<dyn ManagedStorage>> {
        Ok(self.entry(class)?.erased.clone())
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Put one object through its class's manager.
    pub fn put(&self, object: &AnyObject, metadata: &Metadata) -> ManagerResult<()> {
        self.multi_put(std::slice::from_ref(object), metadata)
    }

    /// Partition by class (first-seen order) and forward each partition in
    /// one call.
    pub fn multi_put(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()> {
        for (class, batch) in partition(objects) {
            debug!(class, count = batch.len(), "multi put");
            self.storage_by_class(class)?.multi_put_any(&batch, metadata)?;
        }
        Ok(())
    }

    /// Remove one object through its class's manager.
    pub fn remove(&self, object: &AnyObject, metadata: &Metadata) -> ManagerResult<()> {
        self.multi_remove(std::slice::from_ref(object), metadata)
    }

    /// Partition by class and remove each partition through its manager.
    pub fn multi_remove(&self, objects: &[AnyObject], metadata: &Metadata) -> ManagerResult<()> {
        for (class, batch) in partition(objects) {
            self.storage_by_class(class)?.multi_remove_any(&batch, metadata)?;
        }
        Ok(())
    }

    /// Purge index entries for one tracked object.
    pub fn cache_purge(&self, object: &AnyObject) -> ManagerResult<()> {
        self.storage_by_class(object.class())?.cache_purge_any(object)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// See [`ObjectManager::get`].
    pub fn get<T: Model>(&self, id: impl Into<PrimaryKey>) -> ManagerResult<Option<ObjectRef<T>>> {
        self.storage::<T>()?.get(id)
    }

    /// See [`ObjectManager::get_multi`].
    pub fn get_multi<T: Model>(&self, ids: &[PrimaryKey]) -> ManagerResult<Vec<ObjectRef<T>>> {
        self.storage::<T>()?.get_multi(ids)
    }

    /// See [`ObjectManager::find`].
    pub fn find<T: Model>(&self, query: &Row, options: &FindOptions) -> ManagerResult<Vec<ObjectRef<T>>> {
        self.storage::<T>()?.find(query, options)
    }

    /// See [`ObjectManager::find_multi`].
    pub fn find_multi<T: Model>(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<Vec<Vec<ObjectRef<T>>>> {
        self.storage::<T>()?.find_multi(queries, options)
    }

    /// See [`ObjectManager::found`].
    pub fn found<T: Model>(&self, query: &Row, options: &FindOptions) -> ManagerResult<bool> {
        self.storage::<T>()?.found(query, options)
    }

    /// See [`ObjectManager::found_multi`].
    pub fn found_multi<T: Model>(&self, queries: &[Row], options: &FindOptions) -> ManagerResult<bool> {
        self.storage::<T>()?.found_multi(queries, options)
    }

    /// Clear every manager used since the last clear.
    ///
    /// Every used manager is cleared even if one fails; the first error is
    /// returned and the failed services stay marked as used.
    pub fn clear(&self) -> ManagerResult<()> {
        let used = std::mem::take(&mut *self.used.write().unwrap_or_else(PoisonError::into_inner));
        let mut first_error = None;
        let mut failed = Vec::new();
        for service in used {
            let result = self
                .container
                .resolve(&service)
                .and_then(|entry| entry.erased.clear());
            if let Err(e) = result {
                warn!(%service, error = %e, "manager clear failed");
                failed.push(service);
                first_error.get_or_insert(e);
            }
        }
        if !failed.is_empty() {
            self.used
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(failed);
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn partition(objects: &[AnyObject]) -> Vec<(&'static str, Vec<AnyObject>)> {
    let mut batches: Vec<(&'static str, Vec<AnyObject>)> = Vec::new();
    for object in objects {
        match batches.iter_mut().find(|(class, _)| *class == object.class()) {
            Some((_, batch)) => batch.push(object.clone()),
            None => batches.push((object.class(), vec![object.clone()])),
        }
    }
    batches
}

impl std::fmt::Debug for ManagerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerGroup")
            .field("class_map", &self.class_map)
            .field("used", &self.used_services())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::BasicObjectMapper;
    use crate::test_support::{Post, PostFixture, Topic};
    use strata_store::InMemoryStorage;
    use strata_types::{row, BinaryId};

    fn group(f: &PostFixture) -> ManagerGroup {
        let mut container = ManagerContainer::new();
        container.register_instance("storage.post", Arc::new(f.manager(Arc::new(BasicObjectMapper::<Post>::new()))));
        container.register("storage.topic", || {
            Ok(ObjectManager::<Topic>::new(
                Arc::new(BasicObjectMapper::<Topic>::new()),
                Arc::new(InMemoryStorage::new(["topic_id"])),
                Vec::new(),
                Vec::new(),
            ))
        });
        ManagerGroup::new(
            container,
            [(Post::CLASS, "storage.post"), (Topic::CLASS, "storage.topic")],
        )
    }

    #[test]
    fn unknown_class_lists_known_classes() {
        let f = PostFixture::new();
        let group = group(&f);
        match group.storage_by_class("reply") {
            Err(ManagerError::UnknownClass { class, known }) => {
                assert_eq!(class, "reply");
                assert_eq!(known, "post, topic");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(storage) => panic!("resolved {}", storage.class_name()),
        }
    }

    #[test]
    fn managers_are_built_lazily_and_shared() {
        let f = PostFixture::new();
        let group = group(&f);
        assert!(!group.container.is_built("storage.topic"));
        let a = group.storage::<Topic>().unwrap();
        let b = group.storage::<Topic>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(group.container.is_built("storage.topic"));
    }

    #[test]
    fn mismatched_service_type_is_reported() {
        let f = PostFixture::new();
        let mut container = ManagerContainer::new();
        container.register_instance("storage.post", Arc::new(f.manager(Arc::new(BasicObjectMapper::<Post>::new()))));
        let group = ManagerGroup::new(container, [(Topic::CLASS, "storage.post")]);
        assert!(matches!(
            group.storage::<Topic>(),
            Err(ManagerError::WrongClass { expected: "topic", .. })
        ));
    }

    #[test]
    fn multi_put_partitions_by_class() {
        let f = PostFixture::new();
        let group = group(&f);
        let objects = vec![
            ObjectRef::new(Post::new("a", "one")).to_any(Post::CLASS),
            ObjectRef::new(Topic::new(1, "general")).to_any(Topic::CLASS),
            ObjectRef::new(Post::new("a", "two")).to_any(Post::CLASS),
        ];
        group.multi_put(&objects, &Metadata::new()).unwrap();
        assert_eq!(f.storage.len(), 2);
        // both posts went to storage in one insert batch
        assert_eq!(f.recorder.count("insert"), 2);

        let topic = group.get::<Topic>(1i64).unwrap().unwrap();
        assert_eq!(topic.read().name, "general");
        assert_eq!(
            group.used_services(),
            vec!["storage.post".to_string(), "storage.topic".to_string()]
        );
    }

    #[test]
    fn remove_and_purge_route_by_class() {
        let f = PostFixture::new();
        f.seed();
        let group = group(&f);
        let post = group.get::<Post>(BinaryId::from_u128(1)).unwrap().unwrap();
        let any = post.to_any(Post::CLASS);
        group.cache_purge(&any).unwrap();
        group.remove(&any, &Metadata::new()).unwrap();
        assert_eq!(f.storage.len(), 3);
        assert_eq!(group.find::<Post>(&row([("topic", "a")]), &FindOptions::new()).unwrap().len(), 1);
        assert!(group.found::<Post>(&row([("topic", "a")]), &FindOptions::new()).unwrap());
    }

    #[test]
    fn clear_only_touches_used_managers() {
        let f = PostFixture::new();
        let group = group(&f);
        group.get::<Post>(BinaryId::from_u128(1)).unwrap();
        group.clear().unwrap();
        assert_eq!(f.recorder.count("clear"), 1);
        // the topic manager was never used, so never built
        assert!(!group.container.is_built("storage.topic"));
        assert!(group.used_services().is_empty());

        group.clear().unwrap();
        assert_eq!(f.recorder.count("clear"), 1);
    }

    #[test]
    fn clear_continues_past_a_failing_manager() {
        let f = PostFixture::new();
        let group = group(&f);
        group.get::<Post>(BinaryId::from_u128(1)).unwrap();
        let topic = group.storage::<Topic>().unwrap();
        let general = ObjectRef::new(Topic::new(1, "general"));
        topic.merge(&general);
        f.recorder.fail_on("clear");

        assert!(matches!(group.clear(), Err(ManagerError::Index(_))));
        // the topic manager was still cleared
        assert!(!topic.is_tracked(&general));
        assert_eq!(group.used_services(), vec!["storage.post".to_string()]);
    }

    #[test]
    fn wrong_object_for_class_is_rejected() {
        let f = PostFixture::new();
        let group = group(&f);
        let mislabeled = ObjectRef::new(Topic::new(1, "x")).to_any(Post::CLASS);
        assert!(matches!(
            group.put(&mislabeled, &Metadata::new()),
            Err(ManagerError::WrongClass { expected: "post", .. })
        ));
    }
}
