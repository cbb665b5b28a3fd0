//! Bounded in-memory store.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::CacheStore;

/// Default entry bound.
pub const DEFAULT_MEMORY_SIZE: usize = 1000;

/// LRU store: reads refresh an entry, writes past capacity evict the oldest.
#[derive(Debug)]
pub struct MemoryStore {
    capacity: usize,
    inner: Mutex<Lru>,
}

#[derive(Debug, Default)]
struct Lru {
    entries: FxHashMap<String, String>,
    /// Least recently used first
    order: VecDeque<String>,
}

impl Lru {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Lru::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut lru = self.inner.lock();
        let value = lru.entries.get(key).cloned()?;
        lru.touch(key);
        Some(value)
    }

    fn set(&self, key: &str, value: String) {
        let mut lru = self.inner.lock();
        if lru.entries.insert(key.to_string(), value).is_some() {
            lru.touch(key);
            return;
        }
        lru.order.push_back(key.to_string());
        while lru.entries.len() > self.capacity {
            let Some(oldest) = lru.order.pop_front() else {
                break;
            };
            lru.entries.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let store = MemoryStore::new(2);
        store.set("a", "1".into());
        store.set("b", "2".into());
        // Reading `a` makes `b` the eviction candidate
        assert_eq!(store.get("a").as_deref(), Some("1"));
        store.set("c", "3".into());

        assert_eq!(store.len(), 2);
        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let store = MemoryStore::new(2);
        store.set("a", "1".into());
        store.set("a", "2".into());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").as_deref(), Some("2"));
    }
}
