//! Shared cache facade for the strata persistence layer.
//!
//! Secondary indexes cache compacted row lists in a distributed key/value
//! store. This crate defines the backend contract ([`CacheBackend`]), an
//! in-memory backend, and the [`ObjectCache`] facade that normalizes keys,
//! TTLs and failure handling for the indexes.
//!
//! The shared cache is only consistent with the backing store when every
//! write goes through an object manager with the relevant indexes
//! registered. Out-of-band writes leave stale entries until they expire.

pub mod config;
pub mod error;
pub mod facade;
pub mod memory;
pub mod traits;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use facade::ObjectCache;
pub use memory::InMemoryCacheBackend;
pub use traits::{CacheBackend, SetOptions};
