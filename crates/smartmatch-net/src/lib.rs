//! GraphQL client for SmartMatch.
//!
//! This crate provides the client side of the marketplace's GraphQL API:
//!
//! - **Transport routing**: queries and mutations go over HTTP POST;
//!   subscriptions go over one shared `graphql-transport-ws` connection, or
//!   over HTTP when streaming is unavailable
//! - **Credentials**: a bearer token read fresh from a [`CredentialStore`]
//!   for every request and every streaming (re)connect
//! - **Result cache**: root fields normalized by key arguments, with
//!   pluggable merge strategies; paginated lists accumulate page by page
//! - **Watched queries**: cached results delivered at once, merged network
//!   results after
//!
//! # Quick start
//!
//! ```ignore
//! use smartmatch_net::{ClientConfig, GraphQLClient, GraphQLRequest};
//!
//! let client = GraphQLClient::builder()
//!     .config(ClientConfig::from_env()?)
//!     .build()?;
//!
//! let response = client
//!     .query(&GraphQLRequest::query("query Me { me { id email } }"))
//!     .await?;
//! let me: User = response.field("me")?;
//! ```
//!
//! # Configuration
//!
//! [`ClientConfig::from_env`] reads:
//!
//! - `SMARTMATCH_GRAPHQL_URL` - HTTP endpoint (default `http://localhost:3000/graphql`)
//! - `SMARTMATCH_WS_URL` - server base URL for subscriptions; `/graphql` is appended
//! - `SMARTMATCH_CREDENTIAL_KEY` - key the token is stored under (default `token`)
//! - `SMARTMATCH_STREAMING` - `false` sends subscriptions over HTTP
//! - `SMARTMATCH_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default 30)
//!
//! # Logging
//!
//! Events are emitted with the `tracing` targets in
//! [`smartmatch_core::logging::targets`].

pub mod cache;
pub mod config;
pub mod credential;
mod error;
pub mod graphql;
pub mod transport;

pub use error::{NetworkError, Result};

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, CachePolicies, ConnectionMerge, FieldPolicy, MergeStrategy, Page, ResultCache};
pub use config::{ClientConfig, StreamingCapability};
pub use credential::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use graphql::{
    FetchPolicy, GraphQLClient, GraphQLClientBuilder, GraphQLError, GraphQLRequest,
    GraphQLResponse, ObservableQuery, OperationType, QueryResult, ResultSource,
};
pub use transport::{
    Delivery, ReconnectConfig, Route, SubscriptionMessage, SubscriptionStream, TransportRouter,
};
