use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Configuration for the shared row cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached entries in seconds. `0` means no explicit expiry;
    /// the backend evicts by LRU.
    pub ttl_secs: u64,
    /// Lifetime used instead of `ttl_secs` when the source data may be
    /// stale (pending writes or a lagging replica).
    pub lagged_ttl_secs: u64,
    /// Replica lag above which entries get the lagged lifetime.
    pub max_replica_lag_secs: u64,
    /// Version component of every key. Bump to orphan all existing entries.
    pub key_version: String,
    /// Identifier of the database whose rows are cached.
    pub db_id: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 4 * 24 * 60 * 60,
            lagged_ttl_secs: 30,
            max_replica_lag_secs: 7,
            key_version: "1".into(),
            db_id: "default".into(),
        }
    }
}

impl CacheConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> CacheResult<Self> {
        toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn lagged_ttl(&self) -> Duration {
        Duration::from_secs(self.lagged_ttl_secs)
    }

    pub fn max_replica_lag(&self) -> Duration {
        Duration::from_secs(self.max_replica_lag_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = CacheConfig::default();
        assert_eq!(c.ttl(), Duration::from_secs(345_600));
        assert_eq!(c.lagged_ttl(), Duration::from_secs(30));
        assert_eq!(c.key_version, "1");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let c = CacheConfig::from_toml_str(
            r#"
            ttl_secs = 0
            db_id = "wikidb"
            "#,
        )
        .unwrap();
        assert_eq!(c.ttl_secs, 0);
        assert_eq!(c.db_id, "wikidb");
        assert_eq!(c.max_replica_lag_secs, 7);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = CacheConfig::from_toml_str("ttl_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
