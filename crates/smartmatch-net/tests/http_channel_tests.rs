//! HTTP channel and client tests against a mocked GraphQL endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use smartmatch_net::credential::{CredentialStore, MemoryCredentialStore};
use smartmatch_net::transport::SubscriptionMessage;
use smartmatch_net::{
    ClientConfig, FetchPolicy, GraphQLClient, GraphQLRequest, NetworkError, StreamingCapability,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCTS: &str = "query Products($filter: ProductFilter, $after: String) { \
    products(filter: $filter, after: $after) { edges { cursor } pageInfo { hasNextPage } } }";

fn client(server: &MockServer, store: Arc<MemoryCredentialStore>) -> GraphQLClient {
    GraphQLClient::builder()
        .config(
            ClientConfig::new(format!("{}/graphql", server.uri()))
                .streaming(StreamingCapability::Unavailable)
                .request_timeout(Duration::from_secs(5)),
        )
        .credentials(store)
        .build()
        .expect("Failed to build client")
}

#[tokio::test]
async fn test_bearer_header_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer abc"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({"operationName": "Me"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"me": {"id": "u1"}}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::with_token("abc")));
    let response = client
        .query(&GraphQLRequest::query("query Me { me { id } }"))
        .await
        .unwrap();

    assert_eq!(response.data, Some(json!({"me": {"id": "u1"}})));
}

#[tokio::test]
async fn test_empty_authorization_without_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"me": null}})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    client
        .query(&GraphQLRequest::query("query Me { me { id } }"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers.get("authorization").unwrap(), "");
}

#[tokio::test]
async fn test_login_between_requests_is_picked_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let client = client(&server, store.clone());
    let request = GraphQLRequest::mutation("mutation Touch { ok }");

    client.mutate(&request).await.unwrap();
    store.store("token", "fresh").unwrap();
    client.mutate(&request).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let values: Vec<&str> = requests
        .iter()
        .map(|r| r.headers.get("authorization").unwrap().to_str().unwrap())
        .collect();
    assert_eq!(values, ["", "Bearer fresh"]);
}

#[tokio::test]
async fn test_subscription_posted_when_streaming_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"operationName": "OnBid"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"bidPlaced": {"amount": 12}}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    let mut stream = client
        .subscribe(&GraphQLRequest::subscription(
            "subscription OnBid { bidPlaced { amount } }",
        ))
        .await
        .unwrap();

    match stream.next().await {
        Some(SubscriptionMessage::Data(response)) => {
            assert_eq!(response.data, Some(json!({"bidPlaced": {"amount": 12}})));
        }
        other => panic!("expected data, got {other:?}"),
    }
    assert_eq!(stream.next().await, Some(SubscriptionMessage::Complete));
}

#[tokio::test]
async fn test_error_status_surfaces_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    let err = client
        .query(&GraphQLRequest::query(PRODUCTS))
        .await
        .unwrap_err();

    match err {
        NetworkError::HttpStatus { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message.as_deref(), Some("maintenance"));
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_undecodable_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    let err = client
        .query(&GraphQLRequest::query(PRODUCTS))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::InvalidBody(_)));
}

#[tokio::test]
async fn test_graphql_errors_without_data_leave_cache_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{
                "message": "Not authorized",
                "extensions": {"code": "UNAUTHENTICATED", "timestamp": "2024-01-01T00:00:00.000Z"}
            }]
        })))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    let err = client
        .query(&GraphQLRequest::query(PRODUCTS))
        .await
        .unwrap_err();

    match err {
        NetworkError::GraphQL(errors) => {
            assert_eq!(errors[0].code(), "UNAUTHENTICATED");
            assert_eq!(errors[0].timestamp(), Some("2024-01-01T00:00:00.000Z"));
        }
        other => panic!("expected GraphQL error, got {other:?}"),
    }
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_cache_first_skips_network_on_hit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": {"edges": [{"cursor": "a"}], "pageInfo": {"hasNextPage": false}}}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    let request = GraphQLRequest::query(PRODUCTS).variable("filter", json!({"category": "x"}));

    client.query(&request).await.unwrap();
    let cached = client.query(&request).await.unwrap();
    assert_eq!(cached.data.unwrap()["products"]["edges"], json!([{"cursor": "a"}]));

    // Network-only still goes out, and merges into the same entry.
    let merged = client
        .query_with(&request, FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    assert_eq!(
        merged.data.unwrap()["products"]["edges"],
        json!([{"cursor": "a"}, {"cursor": "a"}])
    );
}

#[tokio::test]
async fn test_cache_only_miss() {
    let server = MockServer::start().await;
    let client = client(&server, Arc::new(MemoryCredentialStore::new()));

    let err = client
        .query_with(&GraphQLRequest::query(PRODUCTS), FetchPolicy::CacheOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::CacheMiss(name) if name == "Products"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_store_clears_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"me": {"id": "u1"}}})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCredentialStore::new()));
    client
        .query(&GraphQLRequest::query("query Me { me { id } }"))
        .await
        .unwrap();
    assert_eq!(client.cache().len(), 1);

    client.reset_store();
    assert!(client.cache().is_empty());
}
