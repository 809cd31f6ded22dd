use std::collections::HashMap;
use std::time::Duration;

use crate::error::CacheResult;

/// Backend-specific hints attached to a write, describing how fresh the
/// data being cached is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Replication lag of the source the data was read from.
    pub replica_lag: Option<Duration>,
    /// The source has uncommitted writes; the data may not survive them.
    pub pending_writes: bool,
}

/// A distributed key/value cache (memcached, redis, ...).
///
/// The cache is process-wide shared state. Its only consistency mechanism
/// is that every write to the backing store goes through an object manager
/// that purges the affected keys; writes that bypass the manager leave
/// stale entries until they expire.
///
/// A TTL of [`Duration::ZERO`] means "no explicit expiry".
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Fetch several keys in one round trip. Missing keys are absent from
    /// the returned map.
    fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, options: &SetOptions)
        -> CacheResult<()>;

    fn delete(&self, key: &str) -> CacheResult<()>;
}
