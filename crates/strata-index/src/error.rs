//! Error types for the index crate.

use strata_store::StoreError;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No registered index can answer the query. Recoverable: the locator
    /// falls back to the backing store.
    #[error("no index (out of {available}) available to answer query for {keys} with options {options}")]
    NoIndex {
        keys: String,
        options: String,
        available: usize,
    },

    /// A row lacks one of the indexed columns.
    #[error("un-indexable row: {0}")]
    Unindexable(String),

    /// The query's columns do not match the index.
    #[error("cannot answer query for columns: {0}")]
    UnsupportedQuery(String),

    /// A unique index found more than one row for a key.
    #[error("unique index holds multiple rows for {0}")]
    UniqueViolation(String),

    /// The index was constructed with invalid options.
    #[error("invalid index configuration: {0}")]
    Configuration(String),

    /// A lifecycle handler rejected an event.
    #[error("lifecycle handler {handler} failed: {reason}")]
    Handler { handler: String, reason: String },

    /// Backing store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
