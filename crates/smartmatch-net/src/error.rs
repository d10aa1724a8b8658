//! Error types for the client.

use thiserror::Error;

use crate::graphql::GraphQLError;

/// Errors surfaced by the client.
///
/// None of these are fatal to the client session: every failure is local to
/// the operation that produced it and can be retried by the caller.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// The request could not be built or sent.
    #[error("request error: {0}")]
    Request(String),

    /// Invalid URL provided.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The request or handshake timed out.
    #[error("request timed out")]
    Timeout,

    /// Connection refused or failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The response body was not a GraphQL response.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// HTTP error status (4xx or 5xx).
    #[error("HTTP {status}{}", status_suffix(.message))]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body, if it could be read.
        message: Option<String>,
    },

    /// The server answered with GraphQL errors and no data.
    #[error("GraphQL error: {}", join_messages(.0))]
    GraphQL(Vec<GraphQLError>),

    /// WebSocket or `graphql-transport-ws` protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A cache-only read found no complete result.
    #[error("no cached result for operation {0}")]
    CacheMiss(String),

    /// Credential store failure.
    #[error("credential store error: {0}")]
    Storage(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
