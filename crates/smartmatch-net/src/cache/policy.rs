//! Per-field cache policies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::key::CacheKey;
use super::merge::ConnectionMerge;

/// Combines an existing cached value with an incoming one.
///
/// Implementations must be pure: the result depends only on the two inputs.
/// Closures of the matching shape implement this trait.
pub trait MergeStrategy: Send + Sync {
    /// The value to store, given what is cached (if anything) and what arrived.
    fn merge(&self, existing: Option<&Value>, incoming: &Value) -> Value;
}

impl<F> MergeStrategy for F
where
    F: Fn(Option<&Value>, &Value) -> Value + Send + Sync,
{
    fn merge(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        self(existing, incoming)
    }
}

/// Which arguments of a root field identify its cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyArgs {
    /// Every argument the field is called with.
    #[default]
    All,
    /// Only the named arguments; the rest (cursors, page sizes) never affect
    /// identity. An empty list gives the field a single entry.
    Only(Vec<String>),
}

impl KeyArgs {
    /// Select the identifying subset of a field's resolved `arguments`.
    ///
    /// Declared names missing from `arguments` are skipped, so operations
    /// that omit them all share the entry built from what they did supply.
    pub fn select(&self, arguments: &Map<String, Value>) -> Map<String, Value> {
        match self {
            Self::All => arguments.clone(),
            Self::Only(names) => names
                .iter()
                .filter_map(|name| arguments.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
        }
    }
}

/// Cache behavior for one root field.
#[derive(Clone, Default)]
pub struct FieldPolicy {
    key_args: KeyArgs,
    merge: Option<Arc<dyn MergeStrategy>>,
}

impl FieldPolicy {
    /// A policy keying on all arguments and replacing on write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key entries on the named arguments only.
    pub fn key_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_args = KeyArgs::Only(names.into_iter().map(Into::into).collect());
        self
    }

    /// Combine incoming values with the cached one using `strategy`.
    pub fn merge(mut self, strategy: impl MergeStrategy + 'static) -> Self {
        self.merge = Some(Arc::new(strategy));
        self
    }

    /// The declared key arguments.
    pub fn declared_key_args(&self) -> &KeyArgs {
        &self.key_args
    }

    /// Whether a merge strategy is registered.
    pub fn has_merge(&self) -> bool {
        self.merge.is_some()
    }

    /// Cache key for `field` called with `arguments`.
    pub fn key_for(&self, field: &str, arguments: &Map<String, Value>) -> CacheKey {
        CacheKey::new(field, &self.key_args.select(arguments))
    }

    /// Value to store: the merge result, or `incoming` when no strategy is set.
    pub fn apply(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        match &self.merge {
            Some(strategy) => strategy.merge(existing, incoming),
            None => incoming.clone(),
        }
    }
}

impl fmt::Debug for FieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPolicy")
            .field("key_args", &self.key_args)
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

/// Field policies by root response key.
#[derive(Debug, Clone, Default)]
pub struct CachePolicies {
    fields: HashMap<String, FieldPolicy>,
}

impl CachePolicies {
    /// No policies: every field keys on all its arguments and is replaced on
    /// write.
    pub fn new() -> Self {
        Self::default()
    }

    /// The marketplace catalog policies: `products` is keyed by `filter` and
    /// `sort`, and its pages accumulate with [`ConnectionMerge`].
    pub fn marketplace() -> Self {
        Self::new().field(
            "products",
            FieldPolicy::new()
                .key_args(["filter", "sort"])
                .merge(ConnectionMerge::default()),
        )
    }

    /// Register `policy` for `field`, replacing any earlier one.
    pub fn field(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.fields.insert(field.into(), policy);
        self
    }

    /// The policy for `field`, if registered.
    pub fn get(&self, field: &str) -> Option<&FieldPolicy> {
        self.fields.get(field)
    }

    /// Cache key for the root field answering to `field`, using the default
    /// policy when none is registered.
    pub fn key_for(&self, field: &str, arguments: &Map<String, Value>) -> CacheKey {
        match self.get(field) {
            Some(policy) => policy.key_for(field, arguments),
            None => CacheKey::new(field, arguments),
        }
    }

    /// Value to store for `field`.
    pub fn apply(&self, field: &str, existing: Option<&Value>, incoming: &Value) -> Value {
        match self.get(field) {
            Some(policy) => policy.apply(existing, incoming),
            None => incoming.clone(),
        }
    }
}
