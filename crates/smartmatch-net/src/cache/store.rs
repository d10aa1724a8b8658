//! Storage beneath the result cache.

use std::collections::HashMap;

use serde_json::Value;

use super::key::CacheKey;

/// Backing storage for cache entries.
///
/// The cache serializes access, so implementations need no locking of their
/// own. Eviction, if any, is the store's business.
pub trait CacheStore: Send {
    /// The entry for `key`.
    fn get(&self, key: &CacheKey) -> Option<Value>;

    /// Insert or replace the entry for `key`.
    fn set(&mut self, key: CacheKey, value: Value);

    /// Remove the entry for `key`, returning it.
    fn remove(&mut self, key: &CacheKey) -> Option<Value>;

    /// Remove every entry.
    fn clear(&mut self);

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys currently stored, in no particular order.
    fn keys(&self) -> Vec<CacheKey>;
}

/// Unbounded in-memory store. Entries live until removed or cleared.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: HashMap<CacheKey, Value>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryStore {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: CacheKey, value: Value) {
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Value> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<CacheKey> {
        self.entries.keys().cloned().collect()
    }
}
