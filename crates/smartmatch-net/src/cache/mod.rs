//! Client-side result cache.
//!
//! Results are normalized per root field: each root field of a query is
//! stored under a [`CacheKey`] built from its response key and the values of
//! its key arguments. Argument values come from the document: literals as
//! written, variable references resolved against the request's variables
//! (whatever the variable is named). Two operations that agree on those
//! values share an entry, whatever their other arguments (cursors, page
//! sizes) are; this is what lets successive pages of a list land in one
//! place.
//!
//! How a new value is combined with the cached one is decided by the field's
//! [`FieldPolicy`]. Without a merge strategy the new value replaces the old.
//! The bundled [`ConnectionMerge`] appends pages of a connection.
//!
//! ```ignore
//! let cache = ResultCache::new(
//!     CachePolicies::new().field(
//!         "products",
//!         FieldPolicy::new()
//!             .key_args(["filter", "sort"])
//!             .merge(ConnectionMerge::default()),
//!     ),
//! );
//! ```

mod key;
mod merge;
mod policy;
mod store;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use smartmatch_core::logging::targets;

pub use key::CacheKey;
pub use merge::{ConnectionMerge, DEFAULT_ITEMS_FIELD, Page, PageInfo};
pub use policy::{CachePolicies, FieldPolicy, KeyArgs, MergeStrategy};
pub use store::{CacheStore, InMemoryStore};

use crate::graphql::{GraphQLRequest, GraphQLResponse, RootField};

/// The result cache of one client session.
///
/// All access goes through one lock: each write reads the existing entries,
/// merges, and stores the result before the next write starts, so
/// concurrent completions are applied one at a time in the order they take
/// the lock.
pub struct ResultCache {
    policies: CachePolicies,
    store: Mutex<Box<dyn CacheStore>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CachePolicies::default())
    }
}

impl ResultCache {
    /// An in-memory cache with the given field policies.
    pub fn new(policies: CachePolicies) -> Self {
        Self::with_store(policies, InMemoryStore::new())
    }

    /// A cache over a custom store.
    pub fn with_store(policies: CachePolicies, store: impl CacheStore + 'static) -> Self {
        Self {
            policies,
            store: Mutex::new(Box::new(store)),
        }
    }

    /// The registered field policies.
    pub fn policies(&self) -> &CachePolicies {
        &self.policies
    }

    /// Keys of the entries `request` reads and writes, one per root field.
    pub fn keys_for(&self, request: &GraphQLRequest) -> Vec<CacheKey> {
        let variables = request.variable_map();
        request
            .root_fields()
            .iter()
            .map(|field| self.key_for(field, &variables))
            .collect()
    }

    fn key_for(&self, field: &RootField, variables: &Map<String, Value>) -> CacheKey {
        self.policies
            .key_for(&field.response_key, &field.resolve_arguments(variables))
    }

    /// Key for a response key of `request`'s data. A key the document does
    /// not select (the document failed to parse) is keyed without arguments.
    fn key_for_response(
        &self,
        request: &GraphQLRequest,
        response_key: &str,
        variables: &Map<String, Value>,
    ) -> CacheKey {
        match request.root_field(response_key) {
            Some(field) => self.key_for(field, variables),
            None => self.policies.key_for(response_key, &Map::new()),
        }
    }

    /// Store or merge each root field of `data` under `request`'s keys.
    ///
    /// Returns the resulting cached value of every field written, shaped like
    /// `data`. Nothing is written when `data` is not an object.
    pub fn write(&self, request: &GraphQLRequest, data: &Value) -> Option<Value> {
        let Value::Object(fields) = data else {
            tracing::debug!(target: targets::CACHE, operation = request.display_name(), "no data object, nothing cached");
            return None;
        };

        let variables = request.variable_map();
        let span = tracing::debug_span!(
            target: targets::CACHE,
            "smartmatch::cache_write",
            operation = request.display_name()
        );
        let _enter = span.enter();

        let mut store = self.store.lock();
        let mut written = Map::with_capacity(fields.len());
        for (field, incoming) in fields {
            let key = self.key_for_response(request, field, &variables);
            let existing = store.get(&key);
            let merged = self.policies.apply(field, existing.as_ref(), incoming);
            tracing::trace!(target: targets::CACHE, key = %key, merged = existing.is_some(), "entry written");
            store.set(key, merged.clone());
            written.insert(field.clone(), merged);
        }
        Some(Value::Object(written))
    }

    /// Write a network response, if it carries data.
    ///
    /// Responses with errors and no data leave the cache untouched.
    pub fn write_response(&self, request: &GraphQLRequest, response: &GraphQLResponse) -> Option<Value> {
        if !response.has_data() {
            return None;
        }
        self.write(request, response.data.as_ref()?)
    }

    /// The cached result of `request`, or `None` unless every root field is
    /// cached.
    pub fn read(&self, request: &GraphQLRequest) -> Option<Value> {
        let fields = request.root_fields();
        if fields.is_empty() {
            return None;
        }

        let variables = request.variable_map();
        let store = self.store.lock();
        let mut result = Map::with_capacity(fields.len());
        for field in fields {
            let value = store.get(&self.key_for(field, &variables))?;
            result.insert(field.response_key.clone(), value);
        }
        Some(Value::Object(result))
    }

    /// The entry stored under `key`.
    pub fn entry(&self, key: &CacheKey) -> Option<Value> {
        self.store.lock().get(key)
    }

    /// Drop the entries `request` would read. Returns how many existed.
    pub fn evict(&self, request: &GraphQLRequest) -> usize {
        let keys = self.keys_for(request);
        let mut store = self.store.lock();
        keys.iter().filter(|key| store.remove(key).is_some()).count()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.store.lock().clear();
        tracing::debug!(target: targets::CACHE, "cache cleared");
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Every key currently stored, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys = self.store.lock().keys();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("policies", &self.policies)
            .field("entries", &self.len())
            .finish()
    }
}
