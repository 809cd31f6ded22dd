use strata_types::TypeError;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row with the same primary key already exists.
    #[error("duplicate primary key: {0}")]
    DuplicateKey(String),

    /// A row is missing one of the primary key columns.
    #[error("row is missing primary key column `{column}`")]
    MissingPrimaryKey { column: String },

    /// The store refused the operation.
    #[error("storage rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// A value could not be interpreted.
    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
