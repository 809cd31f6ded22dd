//! Error types for the manager crate.

use strata_index::IndexError;
use strata_store::StoreError;

/// Errors raised while converting between objects and rows.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("invalid value in column {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}

/// Convenience alias for mapper results.
pub type MapperResult<T> = Result<T, MapperError>;

/// Errors surfaced by locators, managers and manager groups.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// No manager is mapped for the domain class.
    #[error("unknown domain class {class}, known classes: {known}")]
    UnknownClass { class: String, known: String },

    /// The container has no service under this name.
    #[error("no manager registered as {0}")]
    MissingService(String),

    /// Write on an object this manager never loaded or merged.
    #[error("{class} object was not loaded through this manager, merge it first")]
    NotTracked { class: &'static str },

    /// The backing store rejected an insert batch.
    #[error("failed insert: {0}")]
    InsertFailed(String),

    /// An id does not cover the primary key columns.
    #[error("primary key has {expected} columns, got {actual} values")]
    InvalidPrimaryKey { expected: usize, actual: usize },

    /// A pagination offset could not be interpreted.
    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    /// An object was routed to the manager of another class.
    #[error("expected {expected} object, got {actual}")]
    WrongClass { expected: &'static str, actual: String },

    /// An index or lifecycle handler failed.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The backing store failed outside an insert.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A row could not be mapped to or from an object.
    #[error("mapper error: {0}")]
    Mapper(#[from] MapperError),
}

/// Convenience alias for manager results.
pub type ManagerResult<T> = Result<T, ManagerError>;
