//! Transport layer for sending event batches to the collector.
//!
//! The dispatcher is a trait so the pipeline can be exercised without
//! sockets; the production implementation POSTs a JSON envelope to the
//! collector endpoint with an optional bearer token.

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{TelemetryError, TelemetryResult};
use crate::event::TelemetryEvent;

/// Default collector base path when no URL is configured.
pub const DEFAULT_BASE_URL: &str = "/api/analytics";

/// Resolves the bearer token for collector requests.
///
/// Absence of a token is not an error; the request simply goes out
/// without an `Authorization` header.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// A source that always yields the given token.
    pub fn new(token: &str) -> Self {
        Self(Some(token.to_string()))
    }

    /// A source that never yields a token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Checks a list of sources in order and takes the first hit.
///
/// Hosts chain their persisted store, session store and cookie lookup
/// here, in that order.
#[derive(Default)]
pub struct TokenChain {
    sources: Vec<Box<dyn TokenSource>>,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; earlier sources win.
    pub fn with(mut self, source: impl TokenSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl TokenSource for TokenChain {
    fn token(&self) -> Option<String> {
        self.sources.iter().find_map(|s| s.token())
    }
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Collector base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Create a config pointing at the given base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sends event batches to the collector.
pub trait Transport: Send + Sync {
    /// Send one batch. Any non-2xx response is a uniform failure.
    fn send_batch<'a>(
        &'a self,
        events: &'a [TelemetryEvent],
    ) -> BoxFuture<'a, TelemetryResult<()>>;
}

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    events: &'a [TelemetryEvent],
}

/// HTTP transport over reqwest.
pub struct HttpTransport {
    config: TransportConfig,
    client: reqwest::Client,
    token_source: Box<dyn TokenSource>,
}

impl HttpTransport {
    /// Create a transport with the given config and token source.
    pub fn new(config: TransportConfig, token_source: impl TokenSource + 'static) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            token_source: Box::new(token_source),
        }
    }

    /// The configured collector base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/events/batch", self.config.base_url)
    }
}

impl Transport for HttpTransport {
    fn send_batch<'a>(
        &'a self,
        events: &'a [TelemetryEvent],
    ) -> BoxFuture<'a, TelemetryResult<()>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(self.endpoint())
                .json(&BatchEnvelope { events });

            if let Some(token) = self.token_source.token() {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TelemetryError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TelemetryError::Rejected(status.as_u16()));
            }
            debug!(count = events.len(), "batch accepted by collector");
            Ok(())
        })
    }
}
