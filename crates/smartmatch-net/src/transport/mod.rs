//! Transport layer: the channels operations travel over and the router that
//! picks between them.
//!
//! - [`HttpChannel`] sends queries and mutations (and, when streaming is
//!   unavailable, subscriptions) as GraphQL-over-HTTP POST requests.
//! - [`WebSocketChannel`] keeps one `graphql-transport-ws` connection open
//!   and multiplexes every subscription over it.
//! - [`TransportRouter`] classifies each operation, attaches the bearer
//!   credential, and dispatches it.
//!
//! The channel traits exist so the router can be exercised with in-memory
//! channels; the client session uses the concrete types by default.

mod http;
mod router;
mod websocket;

use std::future::Future;

use ::http::HeaderMap;

pub use self::http::HttpChannel;
pub use router::{Delivery, Route, TransportRouter};
pub use websocket::{
    ConnectionState, ReconnectConfig, SubscriptionMessage, SubscriptionStream, WebSocketChannel,
    WebSocketConfig,
};

use crate::error::Result;
use crate::graphql::{GraphQLRequest, GraphQLResponse};

/// A one-shot request/reply channel.
pub trait RequestChannel: Send + Sync + 'static {
    /// Send `request` with the given extra headers and wait for the reply.
    fn execute(
        &self,
        request: &GraphQLRequest,
        headers: HeaderMap,
    ) -> impl Future<Output = Result<GraphQLResponse>> + Send;
}

/// A persistent channel carrying subscriptions.
pub trait StreamingChannel: Send + Sync + 'static {
    /// Start `request` on the shared connection, establishing it if needed.
    fn subscribe(
        &self,
        request: &GraphQLRequest,
    ) -> impl Future<Output = Result<SubscriptionStream>> + Send;

    /// Tear down the connection and complete every open stream.
    fn close(&self);
}
