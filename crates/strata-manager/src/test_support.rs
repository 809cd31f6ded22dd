//! Shared fixtures for the manager tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strata_cache::{CacheConfig, InMemoryCacheBackend, ObjectCache};
use strata_index::{
    Index, IndexError, IndexResult, LifecycleHandler, TopKIndex, TopKOptions, UniqueFeatureIndex,
};
use strata_store::{InMemoryStorage, ObjectStorage};
use strata_types::{row, BinaryId, FindOptions, Metadata, ObjectRef, Row, Value};

use crate::error::{MapperError, MapperResult};
use crate::locator::ObjectLocator;
use crate::manager::ObjectManager;
use crate::mapper::{required_int, required_str, Model, ObjectMapper};

#[derive(Clone, Debug, PartialEq)]
pub struct Post {
    pub id: Option<BinaryId>,
    pub topic: String,
    pub status: String,
    pub title: String,
    pub score: i64,
}

impl Post {
    pub fn new(topic: &str, title: &str) -> Self {
        Self {
            id: None,
            topic: topic.to_string(),
            status: "open".to_string(),
            title: title.to_string(),
            score: 0,
        }
    }

    pub fn with_id(mut self, id: BinaryId) -> Self {
        self.id = Some(id);
        self
    }

    fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }
}

impl Model for Post {
    const CLASS: &'static str = "post";

    fn to_storage_row(&self) -> Row {
        row([
            ("post_id", Value::from(self.id)),
            ("topic", Value::from(self.topic.as_str())),
            ("status", Value::from(self.status.as_str())),
            ("title", Value::from(self.title.as_str())),
            ("score", Value::Int(self.score)),
        ])
    }

    fn from_storage_row(row: &Row) -> MapperResult<Self> {
        let id = match crate::mapper::required(row, "post_id")? {
            Value::Null => None,
            value => Some(value.to_binary_id().map_err(|e| MapperError::InvalidValue {
                column: "post_id".into(),
                reason: e.to_string(),
            })?),
        };
        Ok(Self {
            id,
            topic: required_str(row, "topic")?,
            status: required_str(row, "status")?,
            title: required_str(row, "title")?,
            score: required_int(row, "score")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Topic {
    pub id: i64,
    pub name: String,
}

impl Topic {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl Model for Topic {
    const CLASS: &'static str = "topic";

    fn to_storage_row(&self) -> Row {
        row([
            ("topic_id", Value::Int(self.id)),
            ("name", Value::from(self.name.as_str())),
        ])
    }

    fn from_storage_row(row: &Row) -> MapperResult<Self> {
        Ok(Self {
            id: required_int(row, "topic_id")?,
            name: required_str(row, "name")?,
        })
    }
}

/// Records lifecycle events, optionally failing on one kind.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    updates: Mutex<Vec<(Row, Row, Metadata)>>,
    fail_on: Mutex<Option<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn updates(&self) -> Vec<(Row, Row, Metadata)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn fail_on(&self, event: &str) {
        *self.fail_on.lock().unwrap() = Some(event.to_string());
    }

    fn record(&self, event: &str) -> IndexResult<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(event) {
            return Err(IndexError::Handler {
                handler: "recorder".into(),
                reason: format!("refusing {event}"),
            });
        }
        self.events.lock().unwrap().push(event.to_string());
        Ok(())
    }
}

impl LifecycleHandler<Post> for Recorder {
    fn on_after_load(&self, _object: &ObjectRef<Post>, _row: &Row) -> IndexResult<()> {
        self.record("load")
    }

    fn on_after_insert(&self, _object: &ObjectRef<Post>, _new: &Row, _metadata: &Metadata) -> IndexResult<()> {
        self.record("insert")
    }

    fn on_after_update(&self, _object: &ObjectRef<Post>, old: &Row, new: &Row, metadata: &Metadata) -> IndexResult<()> {
        self.record("update")?;
        self.updates
            .lock()
            .unwrap()
            .push((old.clone(), new.clone(), metadata.clone()));
        Ok(())
    }

    fn on_after_remove(&self, _object: &ObjectRef<Post>, _old: &Row, _metadata: &Metadata) -> IndexResult<()> {
        self.record("remove")
    }

    fn on_after_clear(&self) -> IndexResult<()> {
        self.record("clear")
    }
}

/// Index that answers equality queries on fixed columns with empty
/// buckets and counts how often it was asked.
pub struct MockIndex {
    name: String,
    columns: Vec<String>,
    limit: usize,
    finds: AtomicUsize,
}

impl MockIndex {
    pub fn new(name: &str, columns: &[&str], limit: usize) -> Self {
        let mut columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        columns.sort();
        Self {
            name: name.to_string(),
            columns,
            limit,
            finds: AtomicUsize::new(0),
        }
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::Relaxed)
    }
}

impl Index for MockIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn indexed_columns(&self) -> &[String] {
        &self.columns
    }

    fn can_answer(&self, keys: &[String], _options: &FindOptions) -> bool {
        keys == self.columns.as_slice()
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn sort(&self) -> Option<&[String]> {
        None
    }

    fn find_multi(&self, queries: &[Row], _options: &FindOptions) -> IndexResult<Vec<Vec<Row>>> {
        self.finds.fetch_add(1, Ordering::Relaxed);
        Ok(vec![Vec::new(); queries.len()])
    }

    fn found_multi(&self, _queries: &[Row], _options: &FindOptions) -> IndexResult<bool> {
        Ok(true)
    }

    fn cache_purge(&self, _row: &Row) -> IndexResult<()> {
        Ok(())
    }

    fn on_after_insert(&self, _new: &Row, _metadata: &Metadata) -> IndexResult<()> {
        Ok(())
    }

    fn on_after_update(&self, _old: &Row, _new: &Row, _metadata: &Metadata) -> IndexResult<()> {
        Ok(())
    }

    fn on_after_remove(&self, _old: &Row, _metadata: &Metadata) -> IndexResult<()> {
        Ok(())
    }
}

/// Post table with a unique index on `post_id` and a top-k index on
/// `topic`, sharing one cache.
pub struct PostFixture {
    pub cache: Arc<ObjectCache>,
    pub storage: Arc<InMemoryStorage>,
    pub by_id: Arc<UniqueFeatureIndex>,
    pub by_topic: Arc<TopKIndex>,
    pub recorder: Arc<Recorder>,
}

impl PostFixture {
    pub fn new() -> Self {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = Arc::new(ObjectCache::new(backend, CacheConfig::default()));
        let storage = Arc::new(InMemoryStorage::new(["post_id"]).with_generated_id("post_id"));
        let by_id = Arc::new(UniqueFeatureIndex::new(
            cache.clone(),
            storage.clone(),
            "post",
            vec!["post_id".into()],
        ));
        let by_topic = Arc::new(
            TopKIndex::new(
                cache.clone(),
                storage.clone(),
                "post:topic",
                vec!["topic".into()],
                TopKOptions::sorted_by("post_id"),
            )
            .unwrap(),
        );
        Self {
            cache,
            storage,
            by_id,
            by_topic,
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Four posts: ids 1 and 2 in topic `a`, 3 in `b`, 4 in `c` (closed).
    pub fn seed(&self) {
        let posts = [
            Post::new("a", "first").with_id(BinaryId::from_u128(1)),
            Post::new("a", "second").with_id(BinaryId::from_u128(2)),
            Post::new("b", "third").with_id(BinaryId::from_u128(3)),
            Post::new("c", "fourth")
                .with_id(BinaryId::from_u128(4))
                .with_status("closed"),
        ];
        let rows: Vec<Row> = posts.iter().map(Post::to_storage_row).collect();
        self.storage.insert(&rows).unwrap();
    }

    fn indexes(&self) -> Vec<Arc<dyn Index>> {
        vec![
            self.by_id.clone() as Arc<dyn Index>,
            self.by_topic.clone() as Arc<dyn Index>,
        ]
    }

    pub fn locator(&self, mapper: Arc<dyn ObjectMapper<Post>>) -> ObjectLocator<Post> {
        ObjectLocator::new(mapper, self.storage.clone(), self.indexes(), Vec::new())
    }

    pub fn manager(&self, mapper: Arc<dyn ObjectMapper<Post>>) -> ObjectManager<Post> {
        ObjectManager::new(
            mapper,
            self.storage.clone(),
            self.indexes(),
            vec![self.recorder.clone() as Arc<dyn LifecycleHandler<Post>>],
        )
    }
}
