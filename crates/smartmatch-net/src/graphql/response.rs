//! GraphQL response types.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

use crate::error::NetworkError;

/// Error code reported when the server attaches none.
pub const DEFAULT_ERROR_CODE: &str = "INTERNAL_SERVER_ERROR";

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// The server's error code (`extensions.code`).
    pub fn code(&self) -> &str {
        self.extension_str("code").unwrap_or(DEFAULT_ERROR_CODE)
    }

    /// When the server says the error happened (`extensions.timestamp`).
    pub fn timestamp(&self) -> Option<&str> {
        self.extension_str("timestamp")
    }

    fn extension_str(&self, name: &str) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get(name))
            .and_then(Value::as_str)
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                match segment {
                    PathSegment::Field(name) if i > 0 => write!(f, ".{name}")?,
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// A GraphQL response from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// A response carrying only data.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Check if the response contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if the response was successful (has data and no errors).
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }

    /// Check if the response carries a data object worth caching.
    ///
    /// Partial results (data plus errors) count; `data: null` does not.
    pub fn has_data(&self) -> bool {
        matches!(self.data, Some(Value::Object(_)))
    }

    /// Get the first error, if any.
    pub fn first_error(&self) -> Option<&GraphQLError> {
        self.errors.first()
    }

    /// Get all errors as a combined message.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    /// Parse the data as a specific type.
    ///
    /// Returns an error if the response has errors or if parsing fails.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        if self.has_errors() {
            return Err(NetworkError::GraphQL(self.errors.clone()));
        }

        match &self.data {
            Some(data) => serde_json::from_value(data.clone()).map_err(|e| {
                NetworkError::Json(format!("Failed to deserialize GraphQL response: {e}"))
            }),
            None => Err(NetworkError::InvalidBody("No data in GraphQL response".into())),
        }
    }

    /// Parse a specific root field from the data.
    ///
    /// # Example
    ///
    /// ```ignore
    /// // For a response like: { "data": { "product": { "id": "1", "name": "Lamp" } } }
    /// let product: Product = response.field("product")?;
    /// ```
    pub fn field<T: DeserializeOwned>(&self, field: &str) -> Result<T, NetworkError> {
        if self.has_errors() {
            return Err(NetworkError::GraphQL(self.errors.clone()));
        }

        match &self.data {
            Some(Value::Object(data)) => {
                let field_value = data.get(field).ok_or_else(|| {
                    NetworkError::InvalidBody(format!("Field '{field}' not found in response"))
                })?;
                serde_json::from_value(field_value.clone()).map_err(|e| {
                    NetworkError::Json(format!("Failed to deserialize field '{field}': {e}"))
                })
            }
            Some(_) => Err(NetworkError::InvalidBody(
                "Response data is not an object".into(),
            )),
            None => Err(NetworkError::InvalidBody("No data in GraphQL response".into())),
        }
    }

    /// Get raw data as Value without parsing.
    pub fn raw_data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Fail when the server returned errors and no usable data.
    ///
    /// Partial results pass through so the caller can inspect both halves.
    pub fn into_result(self) -> Result<Self, NetworkError> {
        if self.has_errors() && !self.has_data() {
            Err(NetworkError::GraphQL(self.errors))
        } else {
            Ok(self)
        }
    }
}
