//! Watched query tests: fetch policies, pagination, and superseded runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::HeaderMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use smartmatch_net::cache::{CachePolicies, ResultCache};
use smartmatch_net::credential::MemoryCredentialStore;
use smartmatch_net::transport::{RequestChannel, TransportRouter, WebSocketChannel};
use smartmatch_net::{
    FetchPolicy, GraphQLClient, GraphQLRequest, GraphQLResponse, NetworkError, QueryResult,
    ResultSource, Result,
};
use tokio::sync::oneshot;

/// Answers requests from a script, optionally holding each answer until a
/// gate opens.
#[derive(Default)]
struct ScriptedChannel {
    replies: Mutex<VecDeque<(Option<oneshot::Receiver<()>>, Result<GraphQLResponse>)>>,
    calls: AtomicUsize,
}

impl ScriptedChannel {
    fn reply(&self, data: Value) {
        self.replies
            .lock()
            .push_back((None, Ok(GraphQLResponse::from_data(data))));
    }

    fn gated_reply(&self, data: Value) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        self.replies
            .lock()
            .push_back((Some(gate), Ok(GraphQLResponse::from_data(data))));
        open
    }

    fn fail(&self, error: NetworkError) {
        self.replies.lock().push_back((None, Err(error)));
    }
}

impl RequestChannel for ScriptedChannel {
    async fn execute(&self, _: &GraphQLRequest, _: HeaderMap) -> Result<GraphQLResponse> {
        let next = self.replies.lock().pop_front();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (gate, reply) = next.expect("unexpected request");
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        reply
    }
}

type Client = GraphQLClient<ScriptedChannel, WebSocketChannel>;

fn client() -> Client {
    let router = TransportRouter::new(
        ScriptedChannel::default(),
        None,
        Arc::new(MemoryCredentialStore::new()),
    );
    GraphQLClient::from_parts(router, ResultCache::new(CachePolicies::marketplace()))
}

fn script(client: &Client) -> &ScriptedChannel {
    client.router().request_channel()
}

fn products() -> GraphQLRequest {
    GraphQLRequest::query(
        "query Products($filter: ProductFilter, $after: String) { \
         products(filter: $filter, after: $after) { edges { node { id } } pageInfo { hasNextPage } } }",
    )
    .variable("filter", json!({"category": "x"}))
}

fn page(ids: &[&str], has_next: bool) -> Value {
    json!({
        "products": {
            "edges": ids.iter().map(|id| json!({"node": {"id": id}})).collect::<Vec<_>>(),
            "pageInfo": {"hasNextPage": has_next},
        }
    })
}

fn ids(result: &QueryResult) -> Vec<String> {
    result.data.as_ref().unwrap()["products"]["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|edge| edge["node"]["id"].as_str().unwrap().to_string())
        .collect()
}

fn record(results: &Arc<Mutex<Vec<QueryResult>>>) -> impl Fn(&QueryResult) + Send + Sync + 'static {
    let results = results.clone();
    move |result: &QueryResult| results.lock().push(result.clone())
}

#[tokio::test]
async fn test_cache_and_network_delivers_stale_then_fresh() {
    let client = client();
    script(&client).reply(page(&["A", "B"], true));
    script(&client).reply(page(&["A", "B"], true));

    let query = client.watch_query(products());
    assert_eq!(query.fetch_policy(), FetchPolicy::CacheAndNetwork);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let _guard = query.observe(record(&delivered));

    // Cold cache: one delivery, from the network.
    query.refetch().await.unwrap();
    {
        let delivered = delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].source, ResultSource::Network);
    }

    // Warm cache: the cached result first, then the network result.
    query.refetch().await.unwrap();
    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[1].source, ResultSource::Cache);
    assert_eq!(ids(&delivered[1]), ["A", "B"]);
    assert_eq!(delivered[2].source, ResultSource::Network);
}

#[tokio::test]
async fn test_fetch_more_delivers_accumulated_pages() {
    let client = client();
    script(&client).reply(page(&["A", "B"], true));
    script(&client).reply(page(&["C", "D"], false));

    let query = client.watch_query(products());
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let _guard = query.observe(record(&delivered));

    query.refetch().await.unwrap();
    let more = query.fetch_more(json!({"after": "B"})).await.unwrap();

    assert_eq!(ids(&more), ["A", "B", "C", "D"]);
    assert_eq!(more.data.as_ref().unwrap()["products"]["pageInfo"]["hasNextPage"], false);
    assert_eq!(ids(&query.current_result().unwrap()), ["A", "B", "C", "D"]);
    assert_eq!(ids(delivered.lock().last().unwrap()), ["A", "B", "C", "D"]);
    assert_eq!(script(&client).calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_superseded_run_is_merged_but_not_delivered() {
    let client = client();
    let release_first = script(&client).gated_reply(page(&["A", "B"], true));
    script(&client).reply(page(&["C", "D"], false));

    let query = Arc::new(client.watch_query_with(products(), FetchPolicy::NetworkOnly));
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let _guard = query.observe(record(&delivered));

    let first = tokio::spawn({
        let query = query.clone();
        async move { query.refetch().await }
    });
    while script(&client).calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = query.refetch().await.unwrap();
    assert_eq!(ids(&second), ["C", "D"]);

    release_first.send(()).unwrap();
    let first = first.await.unwrap().unwrap();

    // The late page still landed in the cache...
    assert_eq!(ids(&first), ["C", "D", "A", "B"]);
    assert_eq!(ids(&query.current_result().unwrap()), ["C", "D", "A", "B"]);
    // ...but observers only heard from the newer run.
    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(ids(&delivered[0]), ["C", "D"]);
    assert_eq!(ids(&query.last_result().unwrap()), ["C", "D"]);
}

#[tokio::test]
async fn test_cache_first_answers_from_cache() {
    let client = client();
    script(&client).reply(page(&["A"], false));

    let query = client.watch_query_with(products(), FetchPolicy::CacheFirst);
    query.refetch().await.unwrap();
    let again = query.refetch().await.unwrap();

    assert_eq!(again.source, ResultSource::Cache);
    assert_eq!(script(&client).calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_only_miss_is_delivered_as_error() {
    let client = client();
    let query = client.watch_query_with(products(), FetchPolicy::CacheOnly);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let _guard = query.observe(record(&delivered));

    let err = query.refetch().await.unwrap_err();
    assert!(matches!(err, NetworkError::CacheMiss(_)));
    assert!(matches!(delivered.lock()[0].error, Some(NetworkError::CacheMiss(_))));
    assert_eq!(script(&client).calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_network_failure_keeps_cached_entry() {
    let client = client();
    script(&client).reply(page(&["A"], true));
    script(&client).fail(NetworkError::Timeout);

    let query = client.watch_query(products());
    query.refetch().await.unwrap();
    assert!(matches!(query.fetch_more(json!({"after": "A"})).await, Err(NetworkError::Timeout)));

    assert_eq!(ids(&query.current_result().unwrap()), ["A"]);
    assert!(query.last_result().unwrap().error.is_some());
}

#[tokio::test]
async fn test_watchers_share_the_session_cache() {
    let client = client();
    script(&client).reply(page(&["A"], false));

    let first = client.watch_query(products());
    let second = client.watch_query(products().variable("after", "zzz"));
    first.refetch().await.unwrap();

    // Same key arguments, so the second watcher already has a result.
    assert_eq!(ids(&second.current_result().unwrap()), ["A"]);

    client.reset_store();
    assert!(second.current_result().is_none());
}

#[tokio::test]
async fn test_dropped_guard_stops_deliveries() {
    let client = client();
    script(&client).reply(page(&["A"], false));
    script(&client).reply(page(&["B"], false));

    let query = client.watch_query_with(products(), FetchPolicy::NetworkOnly);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let guard = query.observe(record(&delivered));
    assert_eq!(query.observer_count(), 1);

    query.refetch().await.unwrap();
    drop(guard);
    assert_eq!(query.observer_count(), 0);
    query.refetch().await.unwrap();

    assert_eq!(delivered.lock().len(), 1);
    assert_eq!(ids(&query.last_result().unwrap()), ["A", "B"]);
}
