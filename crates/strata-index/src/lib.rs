//! Secondary indexes for the strata persistence layer.
//!
//! An index answers equality queries over a fixed column set from the
//! shared cache, filling buckets from the backing store on a miss and
//! purging them on every write event it receives.
//!
//! # Key Types
//!
//! - [`Index`] -- The index contract used by locators for selection and lookup
//! - [`LifecycleHandler`] -- Load/insert/update/remove/clear notifications
//! - [`IndexListener`] -- Adapts an [`Index`] into a [`LifecycleHandler`]
//! - [`UniqueFeatureIndex`] -- At most one row per key
//! - [`TopKIndex`] -- The first `limit` rows per key by a fixed ordering
//! - [`Compactor`] -- Strips redundant columns before caching, restores them on read

pub mod compactor;
pub mod error;
pub mod feature;
pub mod lifecycle;
pub mod traits;

pub use compactor::{Compactor, FeatureCompactor, ShallowCompactor};
pub use error::{IndexError, IndexResult};
pub use feature::{
    BucketPolicy, FeatureIndex, TopK, TopKIndex, TopKOptions, Unique, UniqueFeatureIndex,
};
pub use lifecycle::{IndexListener, LifecycleHandler};
pub use traits::Index;
