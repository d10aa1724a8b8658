//! Append-only pagination merge.
//!
//! Pages of a connection-shaped field (`{ edges: [...], pageInfo: {...} }`)
//! accumulate in completion order: items are concatenated, and everything
//! else (cursors, `hasNextPage`, totals) is taken from the newest page.
//! Items are never deduplicated, so fetching the same page twice duplicates
//! its items.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::policy::MergeStrategy;

/// Default name of the items field in a connection.
pub const DEFAULT_ITEMS_FIELD: &str = "edges";

/// Concatenates the items field of successive pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMerge {
    items_field: String,
}

impl Default for ConnectionMerge {
    fn default() -> Self {
        Self::new(DEFAULT_ITEMS_FIELD)
    }
}

impl ConnectionMerge {
    /// Merge pages whose items live under `items_field`.
    pub fn new(items_field: impl Into<String>) -> Self {
        Self {
            items_field: items_field.into(),
        }
    }

    /// Name of the items field.
    pub fn items_field(&self) -> &str {
        &self.items_field
    }

    fn items<'a>(&self, page: Option<&'a Value>) -> &'a [Value] {
        page.and_then(|p| p.get(&self.items_field))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl MergeStrategy for ConnectionMerge {
    fn merge(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        // A null or scalar page replaces whatever was cached.
        let Value::Object(fields) = incoming else {
            return incoming.clone();
        };

        let mut merged: Map<String, Value> = fields.clone();
        let mut items = self.items(existing).to_vec();
        items.extend_from_slice(self.items(Some(incoming)));
        merged.insert(self.items_field.clone(), Value::Array(items));
        Value::Object(merged)
    }
}

/// Cursor metadata of a GraphQL connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Cursor of the last item in the page.
    #[serde(default)]
    pub end_cursor: Option<String>,
    /// Whether more items follow.
    #[serde(default)]
    pub has_next_page: bool,
}

/// A typed page: items plus metadata describing the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T, M = PageInfo> {
    /// The page's items.
    pub items: Vec<T>,
    /// Metadata of the page (cursor, has-next flag).
    pub metadata: M,
}

impl<T: Clone, M: Clone> Page<T, M> {
    /// Create a page.
    pub fn new(items: Vec<T>, metadata: M) -> Self {
        Self { items, metadata }
    }

    /// Append `incoming` to `existing`.
    ///
    /// The result holds `existing`'s items followed by `incoming`'s, with
    /// `incoming`'s metadata. An absent `existing` counts as an empty page.
    pub fn append(existing: Option<&Self>, incoming: &Self) -> Self {
        let mut items = existing.map(|page| page.items.clone()).unwrap_or_default();
        items.extend(incoming.items.iter().cloned());
        Self {
            items,
            metadata: incoming.metadata.clone(),
        }
    }
}
