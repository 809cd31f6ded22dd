//! Object managers for the strata persistence layer.
//!
//! This crate ties the lower layers together:
//!
//! - [`ObjectMapper`] converts domain objects to storage rows and back
//! - [`ObjectLocator`] answers queries through the best index, falling back
//!   to the backing store
//! - [`ObjectManager`] adds the write path: insert-or-update on `put`,
//!   diffed updates, removal, cache purges and the unit-of-work boundary
//! - [`ManagerGroup`] routes mixed-class batches to per-class managers
//!   built lazily from a [`ManagerContainer`]
//!
//! # Example
//!
//! ```ignore
//! let manager = ObjectManager::new(mapper, storage, vec![by_id, by_topic], vec![]);
//! let post = ObjectRef::new(Post::new("rust", "hello"));
//! manager.put(&post, &Metadata::new())?;
//! let recent = manager.find(&row([("topic", "rust")]), &FindOptions::new().with_limit(10))?;
//! ```

pub mod error;
pub mod group;
pub mod identity;
pub mod locator;
pub mod manager;
pub mod mapper;

#[cfg(test)]
mod test_support;

pub use error::{ManagerError, ManagerResult, MapperError, MapperResult};
pub use group::{ManagedStorage, ManagerContainer, ManagerGroup};
pub use identity::IdentityMap;
pub use locator::{ObjectLocator, PrimaryKey};
pub use manager::ObjectManager;
pub use mapper::{
    required, required_int, required_str, BasicObjectMapper, CachingObjectMapper, Model,
    ObjectMapper,
};
