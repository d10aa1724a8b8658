//! The client session.

use std::sync::Arc;

use smartmatch_core::logging::targets;

use super::watch::{FetchPolicy, ObservableQuery};
use super::{GraphQLRequest, GraphQLResponse};
use crate::cache::{CachePolicies, FieldPolicy, ResultCache};
use crate::config::ClientConfig;
use crate::credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::error::{NetworkError, Result};
use crate::transport::{
    HttpChannel, RequestChannel, StreamingChannel, SubscriptionStream, TransportRouter,
    WebSocketChannel,
};

struct ClientInner<R, S> {
    router: TransportRouter<R, S>,
    cache: ResultCache,
}

/// A GraphQL client session.
///
/// Owns one transport router (and through it at most one streaming
/// connection) and one result cache. Clones share both.
///
/// # Example
///
/// ```ignore
/// use smartmatch_net::{ClientConfig, GraphQLClient, GraphQLRequest};
///
/// let client = GraphQLClient::builder()
///     .config(ClientConfig::from_env()?)
///     .build()?;
///
/// let response = client
///     .query(&GraphQLRequest::query("{ me { id email } }"))
///     .await?;
/// ```
pub struct GraphQLClient<R = HttpChannel, S = WebSocketChannel> {
    inner: Arc<ClientInner<R, S>>,
}

impl<R, S> Clone for GraphQLClient<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl GraphQLClient {
    /// Create a builder.
    pub fn builder() -> GraphQLClientBuilder {
        GraphQLClientBuilder::default()
    }

    /// A client configured from the environment, reading credentials from the
    /// credential file in the platform data directory.
    pub fn from_env() -> Result<Self> {
        Self::builder()
            .config(ClientConfig::from_env()?)
            .credentials(Arc::new(FileCredentialStore::in_data_dir()?))
            .build()
    }
}

impl<R: RequestChannel, S: StreamingChannel> GraphQLClient<R, S> {
    /// Assemble a client from a router and a cache.
    pub fn from_parts(router: TransportRouter<R, S>, cache: ResultCache) -> Self {
        Self {
            inner: Arc::new(ClientInner { router, cache }),
        }
    }

    /// The transport router.
    pub fn router(&self) -> &TransportRouter<R, S> {
        &self.inner.router
    }

    /// The result cache.
    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Run a query, answering from the cache when it holds the full result.
    pub async fn query(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        self.query_with(request, FetchPolicy::CacheFirst).await
    }

    /// Run a query under `policy`.
    ///
    /// A one-shot call has a single answer, so `CacheAndNetwork` answers with
    /// the network result here (the cached result is only delivered by
    /// watched queries).
    pub async fn query_with(&self, request: &GraphQLRequest, policy: FetchPolicy) -> Result<GraphQLResponse> {
        match policy {
            FetchPolicy::CacheFirst | FetchPolicy::CacheOnly => {
                if let Some(data) = self.inner.cache.read(request) {
                    tracing::debug!(target: targets::CACHE, operation = request.display_name(), "cache hit");
                    return Ok(GraphQLResponse::from_data(data));
                }
                if policy == FetchPolicy::CacheOnly {
                    return Err(NetworkError::CacheMiss(request.display_name().to_string()));
                }
                self.fetch(request).await
            }
            FetchPolicy::CacheAndNetwork | FetchPolicy::NetworkOnly => self.fetch(request).await,
        }
    }

    /// Run a mutation. Mutation results are not cached.
    pub async fn mutate(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        self.inner.router.execute(request).await?.into_result()
    }

    /// Start a subscription.
    ///
    /// Without a streaming channel the stream yields one response and
    /// completes.
    pub async fn subscribe(&self, request: &GraphQLRequest) -> Result<SubscriptionStream> {
        self.inner.router.subscribe(request).await
    }

    /// Watch `request` under the default `CacheAndNetwork` policy.
    ///
    /// Nothing is fetched until [`ObservableQuery::refetch`] is called;
    /// connect observers first.
    pub fn watch_query(&self, request: GraphQLRequest) -> ObservableQuery<R, S> {
        self.watch_query_with(request, FetchPolicy::default())
    }

    /// Watch `request` under `policy`.
    pub fn watch_query_with(&self, request: GraphQLRequest, policy: FetchPolicy) -> ObservableQuery<R, S> {
        ObservableQuery::new(self.clone(), request, policy)
    }

    /// Drop every cached result.
    pub fn reset_store(&self) {
        self.inner.cache.clear();
    }

    /// Close the streaming connection, completing every open subscription.
    pub fn close(&self) {
        self.inner.router.close();
    }

    /// Send `request` and merge its data into the cache.
    ///
    /// The returned response carries the cache's merged view of the data.
    pub(crate) async fn fetch(&self, request: &GraphQLRequest) -> Result<GraphQLResponse> {
        let mut response = self.inner.router.execute(request).await?.into_result()?;
        if let Some(merged) = self.inner.cache.write_response(request, &response) {
            response.data = Some(merged);
        }
        Ok(response)
    }
}

impl<R, S> std::fmt::Debug for GraphQLClient<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClient")
            .field("router", &self.inner.router)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Builder for [`GraphQLClient`].
pub struct GraphQLClientBuilder {
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    policies: CachePolicies,
}

impl Default for GraphQLClientBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            credentials: None,
            policies: CachePolicies::marketplace(),
        }
    }
}

impl GraphQLClientBuilder {
    /// Use `config`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Read bearer credentials from `store`. Defaults to an empty in-memory
    /// store.
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Replace the cache policies. Defaults to
    /// [`CachePolicies::marketplace`].
    pub fn policies(mut self, policies: CachePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Register one field policy.
    pub fn field_policy(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.policies = self.policies.field(field, policy);
        self
    }

    /// Build the client. No connection is opened until it is needed.
    pub fn build(self) -> Result<GraphQLClient> {
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let router = TransportRouter::from_config(&self.config, credentials)?;
        Ok(GraphQLClient::from_parts(router, ResultCache::new(self.policies)))
    }
}

impl std::fmt::Debug for GraphQLClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClientBuilder")
            .field("config", &self.config)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}
