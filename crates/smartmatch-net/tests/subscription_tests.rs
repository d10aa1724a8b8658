//! Streaming channel tests against an in-process graphql-transport-ws server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use smartmatch_net::credential::{CredentialStore, MemoryCredentialStore};
use smartmatch_net::transport::{
    ConnectionState, ReconnectConfig, StreamingChannel, SubscriptionMessage, WebSocketChannel,
    WebSocketConfig,
};
use smartmatch_net::GraphQLRequest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

type ServerSocket = WebSocketStream<TcpStream>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("smartmatch_net=debug")
        .with_test_writer()
        .try_init();
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/graphql", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one connection, agreeing to the graphql-transport-ws subprotocol.
async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, |request: &Request, mut response: Response| {
        let offered = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(offered.contains("graphql-transport-ws"));
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("graphql-transport-ws"),
        );
        Ok::<_, ErrorResponse>(response)
    })
    .await
    .unwrap()
}

async fn recv(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("client closed the connection"),
            _ => continue,
        }
    }
}

async fn send(socket: &mut ServerSocket, message: Value) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Receive `connection_init`, acknowledge it, and return its payload.
async fn handshake(socket: &mut ServerSocket) -> Value {
    let init = recv(socket).await;
    assert_eq!(init["type"], "connection_init");
    send(socket, json!({"type": "connection_ack"})).await;
    init["payload"].clone()
}

/// Receive a `subscribe` and return its id.
async fn expect_subscribe(socket: &mut ServerSocket) -> String {
    let message = recv(socket).await;
    assert_eq!(message["type"], "subscribe");
    assert!(message["payload"]["query"].as_str().unwrap().contains("bidPlaced"));
    message["id"].as_str().unwrap().to_string()
}

fn channel(url: &str, store: Arc<MemoryCredentialStore>) -> WebSocketChannel {
    let config = WebSocketConfig {
        url: url.to_string(),
        credential_key: "token".into(),
        connection_timeout: Duration::from_secs(5),
        keep_alive_interval: None,
        reconnect: ReconnectConfig::new()
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(100)),
    };
    WebSocketChannel::new(config, store)
}

fn bids() -> GraphQLRequest {
    GraphQLRequest::subscription(
        "subscription OnBid($sessionId: ID!) { bidPlaced(sessionId: $sessionId) { amount } }",
    )
    .variable("sessionId", "live-42")
}

fn amount(message: Option<SubscriptionMessage>) -> i64 {
    match message {
        Some(SubscriptionMessage::Data(response)) => {
            response.data.unwrap()["bidPlaced"]["amount"].as_i64().unwrap()
        }
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_carries_bearer_token() {
    init_tracing();
    let (listener, url) = listen().await;
    let (init_tx, init_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        init_tx.send(handshake(&mut socket).await).unwrap();
        let id = expect_subscribe(&mut socket).await;
        send(&mut socket, json!({"type": "next", "id": id, "payload": {"data": {"bidPlaced": {"amount": 5}}}})).await;
        send(&mut socket, json!({"type": "complete", "id": id})).await;
        // Hold the connection until the client goes away.
        while socket.next().await.is_some() {}
    });

    let channel = channel(&url, Arc::new(MemoryCredentialStore::with_token("abc")));
    let mut stream = channel.subscribe(&bids()).await.unwrap();

    assert_eq!(init_rx.await.unwrap(), json!({"authorization": "abc"}));
    assert_eq!(amount(stream.next().await), 5);
    assert_eq!(stream.next().await, Some(SubscriptionMessage::Complete));
    assert_eq!(channel.state(), ConnectionState::Connected);

    channel.close();
    server.await.unwrap();
}

#[tokio::test]
async fn test_handshake_without_credential_sends_empty_authorization() {
    let (listener, url) = listen().await;
    let (init_tx, init_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        init_tx.send(handshake(&mut socket).await).unwrap();
        while socket.next().await.is_some() {}
    });

    let channel = channel(&url, Arc::new(MemoryCredentialStore::new()));
    let _stream = channel.subscribe(&bids()).await.unwrap();

    assert_eq!(init_rx.await.unwrap(), json!({"authorization": ""}));
    channel.close();
}

#[tokio::test]
async fn test_subscriptions_share_one_connection() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        handshake(&mut socket).await;
        let first = expect_subscribe(&mut socket).await;
        let second = expect_subscribe(&mut socket).await;
        assert_ne!(first, second);
        send(&mut socket, json!({"type": "next", "id": second, "payload": {"data": {"bidPlaced": {"amount": 2}}}})).await;
        send(&mut socket, json!({"type": "next", "id": first, "payload": {"data": {"bidPlaced": {"amount": 1}}}})).await;
        while socket.next().await.is_some() {}
    });

    let channel = channel(&url, Arc::new(MemoryCredentialStore::new()));
    let mut first = channel.subscribe(&bids()).await.unwrap();
    let mut second = channel.subscribe(&bids()).await.unwrap();

    assert_eq!(amount(first.next().await), 1);
    assert_eq!(amount(second.next().await), 2);
    assert_eq!(channel.connections_opened(), 1);
    assert_eq!(channel.active_subscriptions(), 2);

    channel.close();
}

#[tokio::test]
async fn test_reconnect_resubscribes_with_fresh_credential() {
    init_tracing();
    let (listener, url) = listen().await;
    let (drop_tx, drop_rx) = oneshot::channel::<()>();
    let (report_tx, report_rx) = oneshot::channel::<(Value, String, Value, String)>();

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let first_init = handshake(&mut socket).await;
        let first_id = expect_subscribe(&mut socket).await;
        send(&mut socket, json!({"type": "next", "id": first_id, "payload": {"data": {"bidPlaced": {"amount": 1}}}})).await;

        // Drop the connection once the client has logged in.
        drop_rx.await.unwrap();
        drop(socket);

        let mut socket = accept(&listener).await;
        let second_init = handshake(&mut socket).await;
        let second_id = expect_subscribe(&mut socket).await;
        send(&mut socket, json!({"type": "next", "id": second_id, "payload": {"data": {"bidPlaced": {"amount": 2}}}})).await;
        report_tx
            .send((first_init, first_id, second_init, second_id))
            .unwrap();
        while socket.next().await.is_some() {}
    });

    let store = Arc::new(MemoryCredentialStore::new());
    let channel = channel(&url, store.clone());
    let mut stream = channel.subscribe(&bids()).await.unwrap();

    assert_eq!(amount(stream.next().await), 1);
    store.store("token", "after-login").unwrap();
    drop_tx.send(()).unwrap();

    // The same stream keeps delivering after the reconnect.
    assert_eq!(amount(stream.next().await), 2);

    let (first_init, first_id, second_init, second_id) = report_rx.await.unwrap();
    assert_eq!(first_init, json!({"authorization": ""}));
    assert_eq!(second_init, json!({"authorization": "after-login"}));
    assert_eq!(first_id, second_id);
    assert_eq!(channel.connections_opened(), 2);

    channel.close();
}

#[tokio::test]
async fn test_server_error_ends_only_that_subscription() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        handshake(&mut socket).await;
        let id = expect_subscribe(&mut socket).await;
        send(&mut socket, json!({"type": "error", "id": id, "payload": [{"message": "session not found"}]})).await;
        while socket.next().await.is_some() {}
    });

    let channel = channel(&url, Arc::new(MemoryCredentialStore::new()));
    let mut stream = channel.subscribe(&bids()).await.unwrap();

    assert_eq!(
        stream.next().await,
        Some(SubscriptionMessage::Error("session not found".into()))
    );
    assert_eq!(stream.next().await, None);
    assert_eq!(channel.active_subscriptions(), 0);
    assert_eq!(channel.state(), ConnectionState::Connected);

    channel.close();
}

#[tokio::test]
async fn test_close_completes_open_streams() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        handshake(&mut socket).await;
        expect_subscribe(&mut socket).await;
        while socket.next().await.is_some() {}
    });

    let channel = channel(&url, Arc::new(MemoryCredentialStore::new()));
    let mut stream = channel.subscribe(&bids()).await.unwrap();

    channel.close();
    let outcome = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert_eq!(outcome, Some(SubscriptionMessage::Complete));
}

#[tokio::test]
async fn test_unreachable_server_fails_subscribe() {
    // Bind and immediately release a port so nothing is listening on it.
    let (listener, url) = listen().await;
    drop(listener);

    let config = WebSocketConfig {
        url,
        credential_key: "token".into(),
        connection_timeout: Duration::from_secs(2),
        keep_alive_interval: None,
        reconnect: ReconnectConfig::disabled(),
    };
    let channel = WebSocketChannel::new(config, Arc::new(MemoryCredentialStore::new()));

    assert!(channel.subscribe(&bids()).await.is_err());
    assert_eq!(channel.active_subscriptions(), 0);
}
