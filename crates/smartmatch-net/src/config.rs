//! Client configuration.
//!
//! [`ClientConfig`] collects the endpoint URLs, the credential lookup key,
//! the streaming capability flag, and transport timeouts. It can be built in
//! code or loaded from the environment with [`ClientConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use smartmatch_core::logging::targets;
use url::Url;

use crate::credential::DEFAULT_CREDENTIAL_KEY;
use crate::error::{NetworkError, Result};
use crate::transport::ReconnectConfig;

/// Default HTTP endpoint.
pub const DEFAULT_GRAPHQL_URL: &str = "http://localhost:3000/graphql";

/// Environment variable holding the HTTP endpoint.
pub const ENV_GRAPHQL_URL: &str = "SMARTMATCH_GRAPHQL_URL";
/// Environment variable holding the WebSocket server base URL.
pub const ENV_WS_URL: &str = "SMARTMATCH_WS_URL";
/// Environment variable holding the credential lookup key.
pub const ENV_CREDENTIAL_KEY: &str = "SMARTMATCH_CREDENTIAL_KEY";
/// Environment variable enabling or disabling the streaming channel.
pub const ENV_STREAMING: &str = "SMARTMATCH_STREAMING";
/// Environment variable holding the HTTP request timeout in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SMARTMATCH_REQUEST_TIMEOUT_SECS";

/// Whether this process can hold a persistent streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingCapability {
    /// Subscriptions go over the WebSocket channel.
    #[default]
    Available,
    /// Everything goes over HTTP; subscriptions get a single response.
    Unavailable,
}

impl StreamingCapability {
    /// `true` for [`StreamingCapability::Available`].
    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL-over-HTTP endpoint.
    pub graphql_url: String,
    /// `graphql-transport-ws` endpoint.
    pub websocket_url: String,
    /// Key the bearer token is stored under.
    pub credential_key: String,
    /// Whether the streaming channel may be used.
    pub streaming: StreamingCapability,
    /// HTTP request timeout.
    pub request_timeout: Option<Duration>,
    /// HTTP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// WebSocket handshake timeout (TCP/TLS upgrade plus `connection_ack`).
    pub connection_timeout: Duration,
    /// Interval between `ping` messages on the WebSocket.
    pub keep_alive_interval: Option<Duration>,
    /// Reconnect policy for the WebSocket.
    pub reconnect: ReconnectConfig,
    /// User agent for HTTP requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GRAPHQL_URL)
    }
}

impl ClientConfig {
    /// Configuration for `graphql_url`, deriving the WebSocket URL from it.
    pub fn new(graphql_url: impl Into<String>) -> Self {
        let graphql_url = graphql_url.into();
        let websocket_url = http_to_ws_url(&graphql_url);
        Self {
            graphql_url,
            websocket_url,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            streaming: StreamingCapability::Available,
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            connection_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(30)),
            reconnect: ReconnectConfig::default(),
            user_agent: format!("SmartMatch/{} (Rust)", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the WebSocket URL explicitly.
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    /// Set the credential lookup key.
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    /// Declare whether streaming is available.
    pub fn streaming(mut self, streaming: StreamingCapability) -> Self {
        self.streaming = streaming;
        self
    }

    /// Set the HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the WebSocket handshake timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive interval; `None` disables pings.
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the reconnect policy.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Load from the process environment.
    ///
    /// Missing variables fall back to defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let graphql_url = lookup(ENV_GRAPHQL_URL).unwrap_or_else(|| {
            tracing::info!(target: targets::CONFIG, "{ENV_GRAPHQL_URL} not set, using default: {DEFAULT_GRAPHQL_URL}");
            DEFAULT_GRAPHQL_URL.to_string()
        });
        validate_url(ENV_GRAPHQL_URL, &graphql_url, &["http", "https"])?;

        let mut config = Self::new(graphql_url);

        if let Some(base) = lookup(ENV_WS_URL) {
            config.websocket_url = ws_endpoint_from_base(&base);
        }
        validate_url(ENV_WS_URL, &config.websocket_url, &["ws", "wss"])?;

        if let Some(key) = lookup(ENV_CREDENTIAL_KEY) {
            config.credential_key = key;
        }

        if let Some(value) = lookup(ENV_STREAMING) {
            config.streaming = if parse_var::<bool>(ENV_STREAMING, &value)? {
                StreamingCapability::Available
            } else {
                StreamingCapability::Unavailable
            };
        }

        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            let secs = parse_var::<u64>(ENV_REQUEST_TIMEOUT_SECS, &value)?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        tracing::debug!(
            target: targets::CONFIG,
            graphql_url = %config.graphql_url,
            websocket_url = %config.websocket_url,
            streaming = ?config.streaming,
            "client configuration loaded"
        );
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        tracing::warn!(target: targets::CONFIG, "Invalid {key} value: {e}");
        NetworkError::Config(format!("{key}={value}: {e}"))
    })
}

fn validate_url(key: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value).map_err(|e| NetworkError::Config(format!("{key}={value}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(NetworkError::Config(format!(
            "{key}={value}: expected scheme {}",
            schemes.join(" or ")
        )));
    }
    Ok(())
}

/// Convert an HTTP URL to the matching WebSocket URL
/// (`http://` to `ws://`, `https://` to `wss://`).
pub fn http_to_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// The WebSocket endpoint for a server base URL: the HTTP scheme is swapped
/// for its WebSocket counterpart and `/graphql` is appended.
pub fn ws_endpoint_from_base(base: &str) -> String {
    let base = http_to_ws_url(base.trim());
    format!("{}/graphql", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_http_to_ws_url() {
        assert_eq!(
            http_to_ws_url("https://example.com/graphql"),
            "wss://example.com/graphql"
        );
        assert_eq!(
            http_to_ws_url("http://example.com/graphql"),
            "ws://example.com/graphql"
        );
        assert_eq!(http_to_ws_url("ws://already"), "ws://already");
    }

    #[test]
    fn test_ws_endpoint_from_base() {
        assert_eq!(
            ws_endpoint_from_base("https://api.smartmatch.example/"),
            "wss://api.smartmatch.example/graphql"
        );
        assert_eq!(
            ws_endpoint_from_base("http://localhost:3000"),
            "ws://localhost:3000/graphql"
        );
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.graphql_url, DEFAULT_GRAPHQL_URL);
        assert_eq!(config.websocket_url, "ws://localhost:3000/graphql");
        assert_eq!(config.credential_key, "token");
        assert!(config.streaming.is_available());
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_GRAPHQL_URL, "https://api.smartmatch.example/graphql"),
            (ENV_WS_URL, "https://rt.smartmatch.example"),
            (ENV_CREDENTIAL_KEY, "session"),
            (ENV_STREAMING, "false"),
            (ENV_REQUEST_TIMEOUT_SECS, "5"),
        ]))
        .unwrap();

        assert_eq!(config.graphql_url, "https://api.smartmatch.example/graphql");
        assert_eq!(config.websocket_url, "wss://rt.smartmatch.example/graphql");
        assert_eq!(config.credential_key, "session");
        assert_eq!(config.streaming, StreamingCapability::Unavailable);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_STREAMING, "sometimes")])),
            Err(NetworkError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_GRAPHQL_URL, "not a url")])),
            Err(NetworkError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_GRAPHQL_URL, "ftp://host/graphql")])),
            Err(NetworkError::Config(_))
        ));
    }
}
