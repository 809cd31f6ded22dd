//! Error types for the cache crate.

/// Errors reported by cache backends and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A cached payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The cache configuration could not be parsed.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
