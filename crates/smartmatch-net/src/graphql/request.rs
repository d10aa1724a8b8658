//! GraphQL request types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::document::{OperationSummary, RootField, summarize};

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => f.write_str("query"),
            Self::Mutation => f.write_str("mutation"),
            Self::Subscription => f.write_str("subscription"),
        }
    }
}

/// A GraphQL operation.
///
/// Serializes to the standard GraphQL-over-HTTP body
/// (`query`, `variables`, `operationName`, `extensions`). The operation
/// name is taken from the document when one is declared there.
///
/// Builder methods consume the request; once handed to the client it is
/// never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLRequest {
    /// The GraphQL document.
    pub query: String,

    /// Variables for the operation (always a JSON object when present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Operation name (selects the operation in multi-operation documents).
    #[serde(skip_serializing_if = "Option::is_none", rename = "operationName")]
    pub operation_name: Option<String>,

    /// Extensions (implementation-specific metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,

    #[serde(skip)]
    pub(crate) operation_type: OperationType,

    /// Root selection, empty when the document could not be analyzed.
    #[serde(skip)]
    pub(crate) root_fields: Vec<RootField>,
}

impl GraphQLRequest {
    /// Create a new query request.
    ///
    /// The kind is always the one the document declares; `query`,
    /// `mutation` and `subscription` differ only in the kind assumed for a
    /// document that does not parse.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::query(r#"
    ///     query Products($filter: ProductFilter, $after: String) {
    ///         products(filter: $filter, after: $after) {
    ///             edges { node { id name } }
    ///             pageInfo { endCursor hasNextPage }
    ///         }
    ///     }
    /// "#)
    /// .variable("filter", serde_json::json!({"category": "shoes"}));
    /// ```
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Query)
    }

    /// Create a new mutation request.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Mutation)
    }

    /// Create a new subscription request.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::subscription(r#"
    ///     subscription OnBid($sessionId: ID!) {
    ///         bidPlaced(sessionId: $sessionId) { amount }
    ///     }
    /// "#)
    /// .variable("sessionId", "live-42");
    /// ```
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Subscription)
    }

    /// Create a new request from a raw document.
    ///
    /// The operation type is taken from the document's main operation. If
    /// the document does not parse, a keyword scan decides, defaulting to
    /// Query.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let summary = summarize(&query, None).ok();
        let operation_type = summary
            .as_ref()
            .map(|s| s.operation_type)
            .unwrap_or_else(|| Self::infer_operation_type(&query));
        Self::from_parts(query, operation_type, summary)
    }

    fn with_type(query: String, fallback: OperationType) -> Self {
        let summary = summarize(&query, None).ok();
        let operation_type = summary
            .as_ref()
            .map_or(fallback, |s| s.operation_type);
        Self::from_parts(query, operation_type, summary)
    }

    fn from_parts(
        query: String,
        operation_type: OperationType,
        summary: Option<OperationSummary>,
    ) -> Self {
        let (operation_name, root_fields) = match summary {
            Some(summary) => (summary.name, summary.root_fields),
            None => (None, Vec::new()),
        };
        Self {
            query,
            variables: None,
            operation_name,
            extensions: None,
            operation_type,
            root_fields,
        }
    }

    /// Set a variable value.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::query("...")
    ///     .variable("after", "cursor-2")
    ///     .variable("first", 20);
    /// ```
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Replace all variables with a serializable object.
    ///
    /// Values that do not serialize to a JSON object are ignored.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables)
            .ok()
            .filter(Value::is_object);
        self
    }

    /// Overlay `overrides` (a JSON object) on the current variables.
    ///
    /// Used for follow-up page requests: the cursor changes, everything else
    /// stays.
    pub fn merge_variables(mut self, overrides: &Value) -> Self {
        if let Value::Object(overrides) = overrides {
            let variables = self
                .variables
                .get_or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = variables {
                for (name, value) in overrides {
                    map.insert(name.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Select the operation to run in a multi-operation document.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Ok(summary) = summarize(&self.query, Some(&name)) {
            self.operation_type = summary.operation_type;
            self.root_fields = summary.root_fields;
        }
        self.operation_name = Some(name);
        self
    }

    /// Set extensions (implementation-specific metadata).
    pub fn extensions(mut self, extensions: impl Serialize) -> Self {
        self.extensions = serde_json::to_value(extensions).ok();
        self
    }

    /// Get the operation type.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Check if this is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }

    /// Name used in logs and cache-miss errors.
    pub fn display_name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("<anonymous>")
    }

    /// Root selection of the main operation.
    pub fn root_fields(&self) -> &[RootField] {
        &self.root_fields
    }

    /// The root field answering to `response_key`.
    pub fn root_field(&self, response_key: &str) -> Option<&RootField> {
        self.root_fields
            .iter()
            .find(|f| f.response_key == response_key)
    }

    /// Variables as an object map (empty when none are set).
    pub fn variable_map(&self) -> Map<String, Value> {
        match &self.variables {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Keyword fallback for documents `graphql-parser` rejects.
    fn infer_operation_type(query: &str) -> OperationType {
        let first_word = query
            .lines()
            .map(str::trim_start)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == '{' || c == '('))
            .find(|word| !word.is_empty());
        match first_word {
            Some("subscription") => OperationType::Subscription,
            Some("mutation") => OperationType::Mutation,
            _ => OperationType::Query,
        }
    }
}
