//! GraphQL-over-HTTP request/response channel.

use std::time::Duration;

use http::HeaderMap;
use http::header::{ACCEPT, CONTENT_TYPE};
use smartmatch_core::logging::targets;

use super::RequestChannel;
use crate::config::ClientConfig;
use crate::error::{NetworkError, Result};
use crate::graphql::{GraphQLRequest, GraphQLResponse};

/// Sends operations as JSON POST requests to the GraphQL endpoint.
///
/// No retries are attempted: a transport failure, a non-2xx status, or an
/// undecodable body is returned to the caller as-is. The channel is cheap to
/// clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct HttpChannel {
    client: reqwest::Client,
    url: String,
}

impl HttpChannel {
    /// Create a channel for `url` with default timeouts.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::from_config(&ClientConfig::new(url))
    }

    /// Create a channel from the HTTP settings in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::build(
            config.graphql_url.clone(),
            config.request_timeout,
            config.connect_timeout,
            &config.user_agent,
        )
    }

    fn build(
        url: String,
        timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
        user_agent: &str,
    ) -> Result<Self> {
        url::Url::parse(&url)?;

        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url,
        })
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RequestChannel for HttpChannel {
    async fn execute(&self, request: &GraphQLRequest, headers: HeaderMap) -> Result<GraphQLResponse> {
        tracing::debug!(
            target: targets::HTTP,
            operation = request.display_name(),
            kind = %request.operation_type(),
            url = %self.url,
            "POST"
        );

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .headers(headers)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            tracing::debug!(target: targets::HTTP, status = status.as_u16(), "request failed");
            return Err(NetworkError::HttpStatus {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<GraphQLResponse>(&body)
            .map_err(|e| NetworkError::InvalidBody(format!("not a GraphQL response: {e}")))
    }
}
