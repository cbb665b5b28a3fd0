//! Cache stores and the typed cache facade.
//!
//! The pipeline only ever needs `get`/`set` of JSON strings from a store.
//! Entries are immutable once written: a changed input produces a new key,
//! never an update of an old one, so concurrent writers racing on the same
//! key write the same value.
//!
//! - [`NullStore`]: caches nothing
//! - [`MemoryStore`]: bounded LRU held in memory
//! - [`FileStore`]: JSON files under a sharded directory
//!
//! [`Cache`] expands every key with the configured version so bumping the
//! version orphans all previous entries.

mod file;
mod history;
mod memory;

pub use file::FileStore;
pub use history::DependencyHistory;
pub use memory::{DEFAULT_MEMORY_SIZE, MemoryStore};

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::digest::hexdigest;
use crate::error::Result;

/// Format version of cached values, bumped when their layout changes.
const CACHE_VERSION: &str = "kiln-cache:1";

/// Key/value store collaborator.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// Store that never remembers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl CacheStore for NullStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: String) {}
}

/// Typed view over a store for one config version.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    version: String,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    /// Store key for a logical cache key.
    pub fn expand_key(&self, key: &str) -> String {
        hexdigest(&(CACHE_VERSION, self.version.as_str(), key))
    }

    /// Read and deserialize a value. Undecodable entries count as misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(&self.expand_key(key))?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("cache"; "discarding undecodable entry {}: {}", key, err);
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(&self.expand_key(key), raw),
            Err(err) => log!("warning"; "failed to cache {}: {}", key, err),
        }
    }

    /// Return the cached value or compute, store and return it.
    pub fn fetch<T, F>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.set(key, &value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn memory_cache(version: &str, store: &Arc<MemoryStore>) -> Cache {
        Cache::new(Arc::clone(store) as Arc<dyn CacheStore>, version)
    }

    #[test]
    fn test_roundtrip() {
        let store = Arc::new(MemoryStore::new(10));
        let cache = memory_cache("1", &store);
        cache.set("answer", &vec![4, 2]);
        assert_eq!(cache.get::<Vec<i32>>("answer"), Some(vec![4, 2]));
        assert_eq!(cache.get::<Vec<i32>>("question"), None);
    }

    #[test]
    fn test_version_partitions_keys() {
        let store = Arc::new(MemoryStore::new(10));
        memory_cache("1", &store).set("k", &"old");
        assert_eq!(memory_cache("2", &store).get::<String>("k"), None);
        assert_eq!(
            memory_cache("1", &store).get::<String>("k").as_deref(),
            Some("old")
        );
    }

    #[test]
    fn test_wrong_shape_is_a_miss() {
        let store = Arc::new(MemoryStore::new(10));
        let cache = memory_cache("1", &store);
        cache.set("k", &"text");
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_fetch_computes_once() {
        let store = Arc::new(MemoryStore::new(10));
        let cache = memory_cache("1", &store);
        let calls = Cell::new(0);
        for _ in 0..3 {
            let value: u32 = cache
                .fetch("k", || {
                    calls.set(calls.get() + 1);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_null_store() {
        let cache = Cache::new(Arc::new(NullStore), "1");
        cache.set("k", &1);
        assert_eq!(cache.get::<i32>("k"), None);
    }
}
