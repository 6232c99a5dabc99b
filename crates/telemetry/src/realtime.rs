//! Realtime audit-event stream client.
//!
//! Consumes the collector's server-sent-event feed and delivers parsed
//! audit entries to a consumer callback. Connection loss is recovered
//! autonomously: up to five reconnect attempts with a linearly growing
//! delay (5 s, 10 s, 15 s, ...). The backoff is linear rather than
//! exponential by contract with the collector team. A successful open
//! fully forgives prior failures. One malformed message is logged and
//! skipped; it never tears the connection down.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::{TelemetryError, TelemetryResult};
use crate::transport::TokenSource;

/// Default base reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Default reconnect attempt cap.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// One entry of the audit-log feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Who performed the action
    pub actor: Actor,
    /// What was done
    pub action: String,
    /// What it was done to
    pub resource: Resource,
    /// Field-level before/after values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
    /// Request context (ip, user agent, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Compliance annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Value>,
    /// When the action happened
    pub timestamp: DateTime<Utc>,
}

/// The acting principal of an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The target of an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Connection lifecycle of the stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// No connection and none pending
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Stream open, messages flowing
    Open,
    /// Waiting out a reconnect delay
    Reconnecting,
}

/// Tracks reconnect attempts with a linear backoff schedule.
///
/// Attempt `n` waits `base_delay * n`. A successful open resets the
/// counter to zero; once `max_attempts` consecutive failures have been
/// seen, [`next_delay`](Self::next_delay) returns `None` and the
/// client stops retrying.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with the given base delay and attempt cap.
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a successful open; prior failures are fully forgiven.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Record a failure and return the delay before the next attempt,
    /// or `None` once the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.base_delay * self.attempts)
    }

    /// Consecutive failures seen since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

/// Incremental parser for `text/event-stream` framing.
///
/// Chunks may split lines and UTF-8 sequences arbitrarily; the parser
/// buffers until a full line is available. `data:` lines accumulate
/// and are dispatched as one payload on the blank separator line;
/// comment lines (leading `:`) and unknown fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the complete payloads it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&line_bytes[..pos]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(payload) = self.take_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"));
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // Other fields (event, id, retry) are irrelevant to this feed.
        None
    }
}

/// Source of raw stream chunks; the seam for tests.
pub trait StreamSource: Send + Sync {
    /// Open a connection, yielding a chunk stream.
    fn connect(&self) -> BoxFuture<'_, TelemetryResult<BoxStream<'static, TelemetryResult<Vec<u8>>>>>;
}

/// HTTP stream source over reqwest.
pub struct HttpStreamSource {
    url: String,
    client: reqwest::Client,
    token_source: Box<dyn TokenSource>,
}

impl HttpStreamSource {
    /// Create a source reading `<base_url>/realtime/events`.
    pub fn new(base_url: &str, token_source: impl TokenSource + 'static) -> Self {
        Self {
            url: format!("{}/realtime/events", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
            token_source: Box::new(token_source),
        }
    }
}

impl StreamSource for HttpStreamSource {
    fn connect(&self) -> BoxFuture<'_, TelemetryResult<BoxStream<'static, TelemetryResult<Vec<u8>>>>> {
        Box::pin(async move {
            let mut request = self
                .client
                .get(&self.url)
                .header("Accept", "text/event-stream");
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

            let stream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|b| b.to_vec())
                        .map_err(|e| TelemetryError::Network(e.to_string()))
                })
                .boxed();
            Ok(stream)
        })
    }
}

/// Handle to an active subscription.
///
/// Dropping the handle, or calling [`unsubscribe`](Self::unsubscribe)
/// (idempotent), tears the connection down. Callers must retain it for
/// as long as they want the feed.
pub struct Subscription {
    cancel: watch::Sender<bool>,
    status: watch::Receiver<StreamStatus>,
}

impl Subscription {
    /// Stop the stream. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let _ = self.cancel.send(true);
    }

    /// Current connection status.
    pub fn status(&self) -> StreamStatus {
        *self.status.borrow()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

/// Resilient client for the realtime audit feed.
pub struct AuditStreamClient {
    source: Arc<dyn StreamSource>,
    policy: ReconnectPolicy,
    active: Mutex<Option<watch::Sender<bool>>>,
}

impl AuditStreamClient {
    /// Create a client over the given source with the default policy.
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self::with_policy(source, ReconnectPolicy::default())
    }

    /// Create a client with an explicit reconnect policy.
    pub fn with_policy(source: Arc<dyn StreamSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to the feed, delivering each parsed entry to `consumer`.
    ///
    /// At most one connection per client: a prior subscription is
    /// closed first. The returned handle must be retained; dropping it
    /// unsubscribes.
    pub fn subscribe<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(AuditLogEntry) + Send + Sync + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StreamStatus::Disconnected);

        {
            let mut active = self.active.lock().expect("subscription lock poisoned");
            if let Some(prior) = active.replace(cancel_tx.clone()) {
                let _ = prior.send(true);
            }
        }

        let source = self.source.clone();
        let policy = self.policy.clone();
        tokio::spawn(run_stream(
            source,
            policy,
            Arc::new(consumer),
            cancel_rx,
            status_tx,
        ));

        Subscription {
            cancel: cancel_tx,
            status: status_rx,
        }
    }
}

/// The connect/read/reconnect loop.
async fn run_stream(
    source: Arc<dyn StreamSource>,
    mut policy: ReconnectPolicy,
    consumer: Arc<dyn Fn(AuditLogEntry) + Send + Sync>,
    mut cancel: watch::Receiver<bool>,
    status: watch::Sender<StreamStatus>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        let _ = status.send(StreamStatus::Connecting);

        match source.connect().await {
            Ok(mut stream) => {
                let _ = status.send(StreamStatus::Open);
                policy.on_open();
                debug!("audit stream open");

                let mut parser = SseParser::new();
                let clean_shutdown = loop {
                    tokio::select! {
                        _ = cancel.changed() => break true,
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for payload in parser.feed(&bytes) {
                                    dispatch(&consumer, &payload);
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "audit stream error");
                                break false;
                            }
                            None => {
                                warn!("audit stream closed by server");
                                break false;
                            }
                        },
                    }
                };
                if clean_shutdown {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "audit stream connect failed");
            }
        }

        match policy.next_delay() {
            Some(delay) => {
                let _ = status.send(StreamStatus::Reconnecting);
                debug!(attempt = policy.attempts(), delay_secs = delay.as_secs(), "scheduling reconnect");
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                error!(
                    attempts = policy.attempts(),
                    "audit stream reconnect attempts exhausted"
                );
                break;
            }
        }
    }
    let _ = status.send(StreamStatus::Disconnected);
}

/// Parse one SSE payload; a malformed document is logged and skipped.
fn dispatch(consumer: &Arc<dyn Fn(AuditLogEntry) + Send + Sync>, payload: &str) {
    match serde_json::from_str::<AuditLogEntry>(payload) {
        Ok(entry) => consumer(entry),
        Err(e) => warn!(error = %e, "skipping malformed audit event"),
    }
}
