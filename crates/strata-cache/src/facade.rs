use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use strata_types::Row;
use tracing::warn;

use crate::config::CacheConfig;
use crate::traits::{CacheBackend, SetOptions};

/// Facade over a shared [`CacheBackend`] for caching compacted row lists.
///
/// Values read from or written to the backend are also kept in a local,
/// per-instance buffer so that [`ObjectCache::has`] can answer without I/O.
/// The buffer lives for one unit of work: indexes drop it on clear.
/// Backend failures never surface: reads degrade to misses and writes to
/// no-ops, each logged at `warn`.
pub struct ObjectCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    set_options: SetOptions,
    local: RwLock<HashMap<String, Vec<Row>>>,
}

impl ObjectCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            set_options: SetOptions::default(),
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Attach freshness hints describing the store the cached rows come
    /// from. Affects the TTL of subsequent writes.
    pub fn with_set_options(mut self, options: SetOptions) -> Self {
        self.set_options = options;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build a key shared by every process: `global:{class}:{c1}:{c2}...`.
    pub fn make_global_key(&self, class: &str, components: &[&str]) -> String {
        let mut key = format!("global:{class}");
        for component in components {
            key.push(':');
            key.push_str(component);
        }
        key
    }

    /// TTL applied to writes. Shortened to the lagged TTL when the source
    /// has pending writes or lags beyond the configured maximum.
    pub fn effective_ttl(&self) -> Duration {
        let lagging = self
            .set_options
            .replica_lag
            .is_some_and(|lag| lag > self.config.max_replica_lag());
        if self.set_options.pending_writes || lagging {
            let lagged = self.config.lagged_ttl();
            let ttl = self.config.ttl();
            if ttl.is_zero() {
                lagged
            } else {
                ttl.min(lagged)
            }
        } else {
            self.config.ttl()
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<Row>> {
        self.get_multi(&[key.to_string()]).remove(key)
    }

    /// Fetch several keys. Missing or undecodable entries are absent from
    /// the result.
    ///
    /// The shared backend is always consulted, so purges made through other
    /// facades are observed. Hits refresh the local buffer and misses evict
    /// from it. Only when the backend is unreachable are buffered entries
    /// served instead.
    pub fn get_multi(&self, keys: &[String]) -> HashMap<String, Vec<Row>> {
        let mut remote: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            if !remote.contains(key) {
                remote.push(key.clone());
            }
        }
        if remote.is_empty() {
            return HashMap::new();
        }

        let fetched = match self.backend.get_multi(&remote) {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, keys = remote.len(), "cache get failed, serving local buffer");
                let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
                return remote
                    .into_iter()
                    .filter_map(|key| local.get(&key).cloned().map(|rows| (key, rows)))
                    .collect();
            }
        };

        let mut found = HashMap::with_capacity(fetched.len());
        for (key, bytes) in fetched {
            match bincode::deserialize::<Vec<Row>>(&bytes) {
                Ok(rows) => {
                    found.insert(key, rows);
                }
                Err(e) => warn!(%key, error = %e, "undecodable cache payload"),
            }
        }
        let mut local = self.local.write().unwrap_or_else(PoisonError::into_inner);
        for key in &remote {
            match found.get(key) {
                Some(rows) => {
                    local.insert(key.clone(), rows.clone());
                }
                None => {
                    local.remove(key);
                }
            }
        }
        found
    }

    /// Whether `key` was read or written through this facade since the last
    /// [`ObjectCache::clear_local`]. Performs no I/O.
    pub fn has(&self, key: &str) -> bool {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn set(&self, key: &str, rows: Vec<Row>) {
        match bincode::serialize(&rows) {
            Ok(bytes) => {
                if let Err(e) = self.backend.set(key, bytes, self.effective_ttl(), &self.set_options) {
                    warn!(%key, error = %e, "cache set failed");
                }
            }
            Err(e) => warn!(%key, error = %e, "cache payload not encodable"),
        }
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), rows);
    }

    pub fn delete(&self, key: &str) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Err(e) = self.backend.delete(key) {
            warn!(%key, error = %e, "cache delete failed");
        }
    }

    /// Drop the local buffer, ending its unit of work. The shared backend is
    /// untouched.
    pub fn clear_local(&self) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let local = self.local.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .field("set_options", &self.set_options)
            .field("local_entries", &local)
            .finish()
    }
}
