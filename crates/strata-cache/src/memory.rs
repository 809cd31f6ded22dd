use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheBackend, SetOptions};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory [`CacheBackend`] for tests and single-process embedding.
///
/// Can be switched offline with [`InMemoryCacheBackend::set_available`] to
/// exercise degraded-cache behaviour: every call then fails with
/// [`CacheError::Unavailable`].
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining lifetime of `key`, `None` if absent or without expiry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let at = entries.get(key)?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory backend switched off".into()))
        }
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check_available()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .map(|e| e.value.clone()))
    }

    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        _options: &SetOptions,
    ) -> CacheResult<()> {
        self.check_available()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_available()?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheBackend")
            .field("entry_count", &self.len())
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish()
    }
}
