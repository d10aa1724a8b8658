//! Streaming channel over WebSocket.
//!
//! Implements the client side of the graphql-transport-ws protocol.
//! See: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md
//!
//! One supervisor task owns the socket. It connects lazily on the first
//! subscription, performs the `connection_init`/`connection_ack` handshake
//! with a freshly read credential, and multiplexes every subscription over
//! the connection by id. When the connection drops it reconnects with
//! exponential backoff, repeats the handshake, and re-subscribes every
//! subscription that is still open under its original id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smartmatch_core::logging::targets;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::StreamingChannel;
use crate::config::ClientConfig;
use crate::credential::{CredentialStore, read_credential};
use crate::error::{NetworkError, Result};
use crate::graphql::{GraphQLError, GraphQLRequest, GraphQLResponse};

/// WebSocket subprotocol spoken by the channel.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

const STREAM_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// WebSocket message types for graphql-transport-ws protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    /// Client -> Server: Initialize connection
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server -> Client: Connection acknowledged
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction: Ping
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction: Pong
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Client -> Server: Subscribe to operation
    Subscribe { id: String, payload: GraphQLRequest },
    /// Server -> Client: Operation result
    Next { id: String, payload: GraphQLResponse },
    /// Server -> Client: Operation error
    Error {
        id: String,
        payload: Vec<GraphQLError>,
    },
    /// Either direction: Operation complete
    Complete { id: String },
}

impl WsMessage {
    fn to_frame(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// Data received from the subscription.
    Data(GraphQLResponse),
    /// The subscription completed normally.
    Complete,
    /// The subscription failed; no further messages follow.
    Error(String),
}

/// A stream of subscription messages.
///
/// Dropping the stream (or calling [`stop`](Self::stop)) tells the server the
/// client is no longer interested.
pub struct SubscriptionStream {
    receiver: mpsc::Receiver<SubscriptionMessage>,
    subscription_id: String,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl SubscriptionStream {
    /// A stream that yields one already-known result and then completes.
    ///
    /// Used when a subscription had to be sent over the request/response
    /// channel.
    pub fn single(result: Result<GraphQLResponse>) -> Self {
        let (tx, rx) = mpsc::channel(2);
        let first = match result {
            Ok(response) => SubscriptionMessage::Data(response),
            Err(e) => SubscriptionMessage::Error(e.to_string()),
        };
        let terminal = matches!(first, SubscriptionMessage::Error(_));
        let _ = tx.try_send(first);
        if !terminal {
            let _ = tx.try_send(SubscriptionMessage::Complete);
        }
        Self {
            receiver: rx,
            subscription_id: String::new(),
            commands: None,
        }
    }

    /// Get the next message from the subscription.
    ///
    /// Returns `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        self.receiver.recv().await
    }

    /// Stop the subscription.
    pub fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Complete(self.subscription_id.clone()));
        }
        self.receiver.close();
    }

    /// Get the subscription ID (empty for single-response streams).
    pub fn id(&self) -> &str {
        &self.subscription_id
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Complete(self.subscription_id.clone()));
        }
    }
}

impl std::fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("id", &self.subscription_id)
            .finish()
    }
}

/// Configuration for automatic reconnection.
///
/// Delays grow exponentially from `initial_delay` by `backoff_multiplier`,
/// capped at `max_delay`, with ±10% jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts. `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial delay between reconnection attempts.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Never reconnect.
    pub fn disabled() -> Self {
        Self::default().max_attempts(0)
    }

    /// Set the maximum number of reconnection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the initial delay between reconnection attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between reconnection attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier for exponential backoff.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_delay_ms * self.backoff_multiplier.powi(attempt.min(64) as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = delay_ms * 0.1 * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been requested yet.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake complete; subscriptions flow.
    Connected,
    /// Waiting to retry after a drop or failed attempt.
    Reconnecting,
    /// Shut down, or reconnect attempts exhausted.
    Closed,
}

/// Settings for the streaming channel.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `graphql-transport-ws` endpoint.
    pub url: String,
    /// Key the bearer token is stored under.
    pub credential_key: String,
    /// Bound on connecting plus receiving `connection_ack`.
    pub connection_timeout: Duration,
    /// Interval between protocol `ping` messages.
    pub keep_alive_interval: Option<Duration>,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl WebSocketConfig {
    /// Settings for `url` with default timeouts.
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            url: url.into(),
            credential_key: defaults.credential_key,
            connection_timeout: defaults.connection_timeout,
            keep_alive_interval: defaults.keep_alive_interval,
            reconnect: defaults.reconnect,
        }
    }

    /// Extract the streaming settings from a client configuration.
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            url: config.websocket_url.clone(),
            credential_key: config.credential_key.clone(),
            connection_timeout: config.connection_timeout,
            keep_alive_interval: config.keep_alive_interval,
            reconnect: config.reconnect.clone(),
        }
    }
}

enum Command {
    Subscribe(String),
    Complete(String),
    Shutdown,
}

struct ActiveSubscription {
    sender: mpsc::Sender<SubscriptionMessage>,
    request: GraphQLRequest,
}

/// State shared between the channel handle and its supervisor task.
struct Shared {
    subscriptions: Mutex<HashMap<String, ActiveSubscription>>,
    next_id: AtomicU64,
    connections_opened: AtomicU64,
}

impl Shared {
    fn fail_all(&self, message: &str) {
        for (_, sub) in self.subscriptions.lock().drain() {
            let _ = sub
                .sender
                .try_send(SubscriptionMessage::Error(message.to_string()));
        }
    }

    fn complete_all(&self) {
        for (_, sub) in self.subscriptions.lock().drain() {
            let _ = sub.sender.try_send(SubscriptionMessage::Complete);
        }
    }
}

struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

/// The streaming channel.
///
/// Holds at most one live connection; all subscriptions share it.
pub struct WebSocketChannel {
    config: WebSocketConfig,
    credentials: Arc<dyn CredentialStore>,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl WebSocketChannel {
    /// Create a channel; no connection is made until the first subscription.
    pub fn new(config: WebSocketConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            config,
            credentials,
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                connections_opened: AtomicU64::new(0),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.supervisor
            .lock()
            .as_ref()
            .map(|s| *s.state.borrow())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Number of handshakes completed over the channel's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.shared.connections_opened.load(Ordering::SeqCst)
    }

    /// Number of subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }

    /// Return the running supervisor, starting one if none is alive.
    fn ensure_supervisor(&self) -> (mpsc::UnboundedSender<Command>, watch::Receiver<ConnectionState>) {
        let mut guard = self.supervisor.lock();
        if let Some(sup) = guard.as_ref()
            && !sup.commands.is_closed()
        {
            return (sup.commands.clone(), sup.state.clone());
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let task = SupervisorTask {
            config: self.config.clone(),
            credentials: self.credentials.clone(),
            shared: self.shared.clone(),
            state: state_tx,
        };
        tokio::spawn(task.run(command_rx));

        *guard = Some(Supervisor {
            commands: command_tx.clone(),
            state: state_rx.clone(),
        });
        (command_tx, state_rx)
    }
}

impl StreamingChannel for WebSocketChannel {
    async fn subscribe(&self, request: &GraphQLRequest) -> Result<SubscriptionStream> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.shared.subscriptions.lock().insert(
            id.clone(),
            ActiveSubscription {
                sender: tx,
                request: request.clone(),
            },
        );

        let (commands, mut state) = self.ensure_supervisor();
        let ready = tokio::time::timeout(self.config.connection_timeout, async {
            state
                .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
                .await
                .map(|s| *s)
        })
        .await;

        let outcome = match ready {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(NetworkError::Connection("streaming connection closed".into())),
            Err(_) => Err(NetworkError::Timeout),
        };
        if let Err(e) = outcome {
            self.shared.subscriptions.lock().remove(&id);
            let _ = commands.send(Command::Complete(id));
            return Err(e);
        }

        tracing::debug!(target: targets::SUBSCRIPTION, id = %id, operation = request.display_name(), "subscribing");
        let _ = commands.send(Command::Subscribe(id.clone()));

        Ok(SubscriptionStream {
            receiver: rx,
            subscription_id: id,
            commands: Some(commands),
        })
    }

    fn close(&self) {
        if let Some(sup) = self.supervisor.lock().take() {
            let _ = sup.commands.send(Command::Shutdown);
        } else {
            self.shared.complete_all();
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(sup) = self.supervisor.lock().take() {
            let _ = sup.commands.send(Command::Shutdown);
        }
    }
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}

enum ConnectionEnd {
    Shutdown,
    Dropped,
}

struct SupervisorTask {
    config: WebSocketConfig,
    credentials: Arc<dyn CredentialStore>,
    shared: Arc<Shared>,
    state: watch::Sender<ConnectionState>,
}

impl SupervisorTask {
    #[tracing::instrument(name = "smartmatch::streaming_connection", skip_all, fields(url = %self.config.url))]
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut failed_attempts: u32 = 0;

        loop {
            match self.connect().await {
                Ok((write, read)) => {
                    failed_attempts = 0;
                    self.shared.connections_opened.fetch_add(1, Ordering::SeqCst);
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::debug!(target: targets::SUBSCRIPTION, "connection acknowledged");

                    match self.pump(write, read, &mut commands).await {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Dropped => {
                            tracing::warn!(target: targets::SUBSCRIPTION, "connection dropped");
                        }
                    }
                }
                Err(e) => {
                    failed_attempts += 1;
                    tracing::warn!(target: targets::SUBSCRIPTION, attempt = failed_attempts, error = %e, "connection attempt failed");
                }
            }

            // A drop after a healthy connection is retried even when
            // `failed_attempts` is zero; the limit counts consecutive failures.
            if !self.config.reconnect.allows(failed_attempts) {
                tracing::warn!(target: targets::SUBSCRIPTION, "giving up on streaming connection");
                self.state.send_replace(ConnectionState::Closed);
                self.shared.fail_all("streaming connection closed");
                return;
            }

            self.state.send_replace(ConnectionState::Reconnecting);
            let delay = self
                .config
                .reconnect
                .delay_for_attempt(failed_attempts.saturating_sub(1));
            if !self.wait_before_retry(delay, &mut commands).await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        self.shared.complete_all();
        tracing::debug!(target: targets::SUBSCRIPTION, "streaming channel shut down");
    }

    /// Open the socket and complete the handshake within the timeout.
    async fn connect(&self) -> Result<(WsWrite, WsRead)> {
        tokio::time::timeout(self.config.connection_timeout, self.handshake())
            .await
            .map_err(|_| NetworkError::Timeout)?
    }

    async fn handshake(&self) -> Result<(WsWrite, WsRead)> {
        let mut request = self.config.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = stream.split();

        // Read per connection so a login between reconnects takes effect.
        let credential = read_credential(self.credentials.as_ref(), &self.config.credential_key);
        let init = WsMessage::ConnectionInit {
            payload: Some(credential.connection_params()),
        };
        send(&mut write, &init).await?;

        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text)? {
                    WsMessage::ConnectionAck { .. } => return Ok((write, read)),
                    WsMessage::Ping { .. } => {
                        send(&mut write, &WsMessage::Pong { payload: None }).await?;
                    }
                    other => {
                        return Err(NetworkError::WebSocket(format!(
                            "expected connection_ack, got {other:?}"
                        )));
                    }
                },
                Message::Close(frame) => {
                    return Err(NetworkError::WebSocket(format!(
                        "server closed connection during handshake: {frame:?}"
                    )));
                }
                _ => {}
            }
        }
        Err(NetworkError::WebSocket("connection ended during handshake".into()))
    }

    /// Drive one established connection until it ends.
    async fn pump(
        &self,
        mut write: WsWrite,
        mut read: WsRead,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> ConnectionEnd {
        let mut sent: HashSet<String> = HashSet::new();

        // Re-subscribe everything still open, under the original ids.
        let pending: Vec<(String, GraphQLRequest)> = self
            .shared
            .subscriptions
            .lock()
            .iter()
            .map(|(id, sub)| (id.clone(), sub.request.clone()))
            .collect();
        for (id, request) in pending {
            if send(&mut write, &WsMessage::Subscribe { id: id.clone(), payload: request })
                .await
                .is_err()
            {
                return ConnectionEnd::Dropped;
            }
            sent.insert(id);
        }

        let mut keep_alive = self
            .config
            .keep_alive_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Subscribe(id)) => {
                        let request = if sent.contains(&id) {
                            None
                        } else {
                            self.shared.subscriptions.lock().get(&id).map(|s| s.request.clone())
                        };
                        if let Some(request) = request {
                            if send(&mut write, &WsMessage::Subscribe { id: id.clone(), payload: request }).await.is_err() {
                                return ConnectionEnd::Dropped;
                            }
                            sent.insert(id);
                        }
                    }
                    Some(Command::Complete(id)) => {
                        self.shared.subscriptions.lock().remove(&id);
                        if sent.remove(&id)
                            && send(&mut write, &WsMessage::Complete { id }).await.is_err()
                        {
                            return ConnectionEnd::Dropped;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return ConnectionEnd::Shutdown;
                    }
                },

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Ping { .. }) => {
                                if send(&mut write, &WsMessage::Pong { payload: None }).await.is_err() {
                                    return ConnectionEnd::Dropped;
                                }
                            }
                            Ok(message) => self.dispatch(message, &mut sent),
                            Err(e) => {
                                tracing::warn!(target: targets::SUBSCRIPTION, error = %e, "unrecognized message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(target: targets::SUBSCRIPTION, ?frame, "server closed connection");
                        return ConnectionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(target: targets::SUBSCRIPTION, error = %e, "read failed");
                        return ConnectionEnd::Dropped;
                    }
                    None => return ConnectionEnd::Dropped,
                },

                _ = tick(&mut keep_alive) => {
                    if send(&mut write, &WsMessage::Ping { payload: None }).await.is_err() {
                        return ConnectionEnd::Dropped;
                    }
                }
            }
        }
    }

    /// Route a server message to its subscription.
    fn dispatch(&self, message: WsMessage, sent: &mut HashSet<String>) {
        match message {
            WsMessage::Next { id, payload } => {
                let subscriptions = self.shared.subscriptions.lock();
                if let Some(sub) = subscriptions.get(&id)
                    && sub.sender.try_send(SubscriptionMessage::Data(payload)).is_err()
                {
                    tracing::warn!(target: targets::SUBSCRIPTION, id = %id, "subscriber lagging, message dropped");
                }
            }
            WsMessage::Error { id, payload } => {
                sent.remove(&id);
                if let Some(sub) = self.shared.subscriptions.lock().remove(&id) {
                    let message = if payload.is_empty() {
                        "Unknown error".to_string()
                    } else {
                        payload
                            .iter()
                            .map(|e| e.message.as_str())
                            .collect::<Vec<_>>()
                            .join("; ")
                    };
                    let _ = sub.sender.try_send(SubscriptionMessage::Error(message));
                }
            }
            WsMessage::Complete { id } => {
                sent.remove(&id);
                if let Some(sub) = self.shared.subscriptions.lock().remove(&id) {
                    let _ = sub.sender.try_send(SubscriptionMessage::Complete);
                }
            }
            WsMessage::Pong { .. } | WsMessage::ConnectionAck { .. } => {}
            other => {
                tracing::debug!(target: targets::SUBSCRIPTION, message = ?other, "ignoring unexpected message");
            }
        }
    }

    /// Sleep for `delay` while still honoring commands. Returns `false` on
    /// shutdown.
    async fn wait_before_retry(
        &self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = commands.recv() => match command {
                    Some(Command::Complete(id)) => {
                        self.shared.subscriptions.lock().remove(&id);
                    }
                    // Replayed once the connection is back.
                    Some(Command::Subscribe(_)) => {}
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }
}

async fn send(write: &mut WsWrite, message: &WsMessage) -> Result<()> {
    write.send(message.to_frame()?).await?;
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
