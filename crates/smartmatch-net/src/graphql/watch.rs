//! Watched queries.
//!
//! An [`ObservableQuery`] ties a query to the client's cache and notifies
//! connected slots whenever a new result for it is available. With the
//! default [`FetchPolicy::CacheAndNetwork`] a run delivers the cached result
//! first (when the cache holds every root field) and the merged network
//! result when it arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use smartmatch_core::logging::targets;
use smartmatch_core::{ConnectionGuard, Signal};

use super::client::GraphQLClient;
use super::{GraphQLError, GraphQLRequest, GraphQLResponse};
use crate::error::{NetworkError, Result};
use crate::transport::{HttpChannel, RequestChannel, StreamingChannel, WebSocketChannel};

/// How a query consults the cache and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Answer from the cache when it holds the full result, otherwise fetch.
    CacheFirst,
    /// Answer from the cache immediately, then fetch and answer again.
    #[default]
    CacheAndNetwork,
    /// Always fetch; the result is still written to the cache.
    NetworkOnly,
    /// Never fetch; a missing result is an error.
    CacheOnly,
}

impl FetchPolicy {
    /// Whether the cache is consulted before any network request.
    pub fn reads_cache(self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Read from the cache without network I/O.
    Cache,
    /// A network response, after it was merged into the cache.
    Network,
}

/// One delivery to a watched query's observers.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// The result data. For network results this is the cache's merged view,
    /// so paginated fields hold every page fetched so far.
    pub data: Option<Value>,
    /// GraphQL errors returned with the data.
    pub errors: Vec<GraphQLError>,
    /// The failure, when the run failed.
    pub error: Option<NetworkError>,
    /// Where the result came from.
    pub source: ResultSource,
}

impl QueryResult {
    fn from_cache(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            error: None,
            source: ResultSource::Cache,
        }
    }

    fn from_response(response: GraphQLResponse) -> Self {
        Self {
            data: response.data,
            errors: response.errors,
            error: None,
            source: ResultSource::Network,
        }
    }

    fn from_error(error: NetworkError, source: ResultSource) -> Self {
        Self {
            data: None,
            errors: Vec::new(),
            error: Some(error),
            source,
        }
    }

    /// Whether the result carries data and no failure.
    pub fn is_ok(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    /// Deserialize a root field of the data.
    pub fn field<T: serde::de::DeserializeOwned>(&self, field: &str) -> Result<T> {
        let value = self
            .data
            .as_ref()
            .and_then(|data| data.get(field))
            .ok_or_else(|| NetworkError::InvalidBody(format!("Field '{field}' not in result")))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A query whose results are pushed to observers.
///
/// Each [`refetch`](Self::refetch) or [`fetch_more`](Self::fetch_more)
/// supersedes the runs before it: a superseded run's response is still
/// merged into the cache, but observers only hear from the newest run.
pub struct ObservableQuery<R = HttpChannel, S = WebSocketChannel> {
    client: GraphQLClient<R, S>,
    request: GraphQLRequest,
    policy: FetchPolicy,
    generation: AtomicU64,
    changed: Arc<Signal<QueryResult>>,
    last: Mutex<Option<QueryResult>>,
}

impl<R: RequestChannel, S: StreamingChannel> ObservableQuery<R, S> {
    pub(crate) fn new(client: GraphQLClient<R, S>, request: GraphQLRequest, policy: FetchPolicy) -> Self {
        Self {
            client,
            request,
            policy,
            generation: AtomicU64::new(0),
            changed: Arc::new(Signal::new()),
            last: Mutex::new(None),
        }
    }

    /// The watched operation.
    pub fn request(&self) -> &GraphQLRequest {
        &self.request
    }

    /// The fetch policy each run follows.
    pub fn fetch_policy(&self) -> FetchPolicy {
        self.policy
    }

    /// Emitted with every delivered result.
    pub fn changed(&self) -> &Arc<Signal<QueryResult>> {
        &self.changed
    }

    /// Connect `slot` until the returned guard is dropped.
    pub fn observe<F>(&self, slot: F) -> ConnectionGuard<QueryResult>
    where
        F: Fn(&QueryResult) + Send + Sync + 'static,
    {
        self.changed.connect_scoped(slot)
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.changed.connection_count()
    }

    /// The cached result, read without network I/O.
    pub fn current_result(&self) -> Option<QueryResult> {
        self.client.cache().read(&self.request).map(QueryResult::from_cache)
    }

    /// The most recent delivered result.
    pub fn last_result(&self) -> Option<QueryResult> {
        self.last.lock().clone()
    }

    /// Run the query under its fetch policy.
    ///
    /// Returns the final result of this run, whether or not a newer run
    /// superseded it before it completed.
    pub async fn refetch(&self) -> Result<QueryResult> {
        let generation = self.next_generation();

        if self.policy.reads_cache()
            && let Some(cached) = self.current_result()
        {
            tracing::debug!(target: targets::WATCH, operation = self.request.display_name(), "delivering cached result");
            self.deliver(generation, cached.clone());
            if matches!(self.policy, FetchPolicy::CacheFirst | FetchPolicy::CacheOnly) {
                return Ok(cached);
            }
        } else if self.policy == FetchPolicy::CacheOnly {
            let error = NetworkError::CacheMiss(self.request.display_name().to_string());
            self.deliver(generation, QueryResult::from_error(error.clone(), ResultSource::Cache));
            return Err(error);
        }

        let outcome = self.client.fetch(&self.request).await;
        self.complete(generation, outcome)
    }

    /// Fetch a follow-up page: the same document with `variables` laid over
    /// the watched variables (typically a new cursor).
    ///
    /// The page merges into the watched query's cache entries and observers
    /// receive the merged result.
    pub async fn fetch_more(&self, variables: Value) -> Result<QueryResult> {
        let generation = self.next_generation();
        let request = self.request.clone().merge_variables(&variables);
        tracing::debug!(target: targets::WATCH, operation = self.request.display_name(), "fetching more");

        let outcome = self.client.fetch(&request).await.map(|mut response| {
            // Report the watched entries, which the page was merged into.
            if let Some(merged) = self.client.cache().read(&self.request) {
                response.data = Some(merged);
            }
            response
        });
        self.complete(generation, outcome)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn complete(&self, generation: u64, outcome: Result<GraphQLResponse>) -> Result<QueryResult> {
        match outcome {
            Ok(response) => {
                let result = QueryResult::from_response(response);
                self.deliver(generation, result.clone());
                Ok(result)
            }
            Err(e) => {
                self.deliver(generation, QueryResult::from_error(e.clone(), ResultSource::Network));
                Err(e)
            }
        }
    }

    fn deliver(&self, generation: u64, result: QueryResult) {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(target: targets::WATCH, operation = self.request.display_name(), "superseded result not delivered");
            return;
        }
        *self.last.lock() = Some(result.clone());
        self.changed.emit(result);
    }
}

impl<R, S> std::fmt::Debug for ObservableQuery<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableQuery")
            .field("operation", &self.request.display_name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
