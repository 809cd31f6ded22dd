//! Foundation types for the strata object persistence layer.
//!
//! Every other strata crate depends on `strata-types`.
//!
//! # Key Types
//!
//! - [`Value`] / [`Row`] -- scalar column values and flat storage rows
//! - [`BinaryId`] -- 88-bit timestamped identifier with alphadecimal form
//! - [`FindOptions`] -- limit, sort, order and cursor options of a query
//! - [`StorageQuery`] / [`StorageOptions`] -- the query shape sent to a backing store
//! - [`ObjectRef`] / [`AnyObject`] -- identity-tracked domain object handles
//! - [`Metadata`] -- opaque context passed to lifecycle handlers

pub mod error;
pub mod id;
pub mod metadata;
pub mod object;
pub mod query;
pub mod value;

pub use error::TypeError;
pub use id::{BinaryId, ALNUM_LEN, BIN_LEN, HEX_LEN, MIN_ALNUM_LEN};
pub use metadata::Metadata;
pub use object::{AnyObject, ObjectIdentity, ObjectRef, WeakObjectRef};
pub use query::{
    Comparison, Condition, FindOptions, OrderBy, SortOrder, StorageOptions, StorageQuery,
};
pub use value::{alphadecimal_ids, calc_updates, row, rows_equal, split_from_row, Row, Value};
