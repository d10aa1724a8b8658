//! Per-operation channel selection and credential attachment.

use std::sync::Arc;

use ::http::header::AUTHORIZATION;
use ::http::{HeaderMap, HeaderValue};
use smartmatch_core::logging::targets;

use super::{
    HttpChannel, RequestChannel, StreamingChannel, SubscriptionStream, WebSocketChannel,
    WebSocketConfig,
};
use crate::config::ClientConfig;
use crate::credential::{CredentialStore, read_credential};
use crate::error::Result;
use crate::graphql::{GraphQLRequest, GraphQLResponse};

/// The channel an operation travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// One-shot request/response (HTTP POST).
    Request,
    /// The shared streaming connection.
    Streaming,
}

/// What a dispatched operation produced.
#[derive(Debug)]
pub enum Delivery {
    /// A single response from the request/response channel.
    Response(GraphQLResponse),
    /// A live subscription on the streaming channel.
    Stream(SubscriptionStream),
}

/// Sends each operation over the appropriate channel.
///
/// Subscriptions go to the streaming channel when one was supplied;
/// everything else, and subscriptions when streaming is unavailable, goes to
/// the request/response channel. The bearer credential is read from the
/// store for every dispatch.
pub struct TransportRouter<R = HttpChannel, S = WebSocketChannel> {
    request: R,
    streaming: Option<S>,
    credentials: Arc<dyn CredentialStore>,
    credential_key: String,
}

impl TransportRouter {
    /// Build the HTTP channel, and the WebSocket channel if the
    /// configuration declares streaming available.
    pub fn from_config(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let request = HttpChannel::from_config(config)?;
        let streaming = config.streaming.is_available().then(|| {
            WebSocketChannel::new(WebSocketConfig::from_client_config(config), credentials.clone())
        });
        Ok(Self::new(request, streaming, credentials).credential_key(config.credential_key.clone()))
    }
}

impl<R: RequestChannel, S: StreamingChannel> TransportRouter<R, S> {
    /// Create a router. Pass `None` for `streaming` when the process cannot
    /// hold a persistent connection.
    pub fn new(request: R, streaming: Option<S>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            request,
            streaming,
            credentials,
            credential_key: crate::credential::DEFAULT_CREDENTIAL_KEY.to_string(),
        }
    }

    /// Set the key the bearer token is read from.
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    /// Pick the channel for `request`.
    pub fn route(&self, request: &GraphQLRequest) -> Route {
        if request.is_subscription() && self.streaming.is_some() {
            Route::Streaming
        } else {
            Route::Request
        }
    }

    /// Whether a streaming channel is available.
    pub fn has_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// The request/response channel.
    pub fn request_channel(&self) -> &R {
        &self.request
    }

    /// The streaming channel, if any.
    pub fn streaming_channel(&self) -> Option<&S> {
        self.streaming.as_ref()
    }

    /// Headers carrying the current credential.
    ///
    /// The `authorization` header is always present; it is empty when no
    /// credential is stored, and when the stored token holds characters a
    /// header value cannot carry.
    pub fn authorization_headers(&self) -> HeaderMap {
        let credential = read_credential(self.credentials.as_ref(), &self.credential_key);
        let value = HeaderValue::from_str(&credential.authorization_header()).unwrap_or_else(|_| {
            tracing::warn!(target: targets::CREDENTIAL, key = %self.credential_key, "stored credential is not a valid header value, continuing unauthenticated");
            HeaderValue::from_static("")
        });
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        headers
    }

    /// Send `request` over its channel.
    #[tracing::instrument(
        name = "smartmatch::dispatch",
        skip_all,
        fields(operation = request.display_name(), kind = %request.operation_type())
    )]
    pub async fn dispatch(&self, request: &GraphQLRequest) -> Result<Delivery> {
        match (self.route(request), &self.streaming) {
            (Route::Streaming, Some(streaming)) => {
                tracing::debug!(target: targets::ROUTER, "routing to streaming channel");
                Ok(Delivery::Stream(streaming.subscribe(request).await?))
            }
            _ => {
                if request.is_subscription() {
                    tracing::debug!(target: targets::ROUTER, "streaming unavailable, sending subscription as a request");
                }
                Ok(Delivery::Response(self.send_request(request).await?))
            }
        }
    }

    /// Send `request` over the request/response channel regardless of kind.
    pub async fn execute(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        self.send_request(request).await
    }

    /// Start a subscription.
    ///
    /// Without a streaming channel the operation is sent once as a request
    /// and the returned stream yields that single result, then completes.
    pub async fn subscribe(&self, request: &GraphQLRequest) -> Result<SubscriptionStream> {
        match self.dispatch(request).await {
            Ok(Delivery::Stream(stream)) => Ok(stream),
            Ok(Delivery::Response(response)) => Ok(SubscriptionStream::single(Ok(response))),
            Err(e) if self.route(request) == Route::Request => Ok(SubscriptionStream::single(Err(e))),
            Err(e) => Err(e),
        }
    }

    /// Close the streaming channel, completing every open stream.
    pub fn close(&self) {
        if let Some(streaming) = &self.streaming {
            streaming.close();
        }
    }

    async fn send_request(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        self.request
            .execute(request, self.authorization_headers())
            .await
    }
}

impl<R, S> std::fmt::Debug for TransportRouter<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRouter")
            .field("streaming", &self.streaming.is_some())
            .field("credential_key", &self.credential_key)
            .finish_non_exhaustive()
    }
}
