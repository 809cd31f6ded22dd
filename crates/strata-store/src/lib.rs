//! Backing-store contract for the strata persistence layer.
//!
//! The object managers never talk to a database directly. They require an
//! [`ObjectStorage`] implementation for each domain class: an equality-query,
//! batch-oriented row store. The embedding application supplies the real
//! adapter; this crate ships [`InMemoryStorage`] for tests and embedding.
//!
//! # Design Rules
//!
//! 1. `find_multi` results line up one-to-one with the input queries.
//! 2. `insert` returns rows as stored, so generated columns flow back to
//!    the caller's objects.
//! 3. The store never caches; caching is the job of indexes layered above.
//! 4. All errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStorage;
pub use traits::ObjectStorage;
