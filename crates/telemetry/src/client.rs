//! High-level analytics client.
//!
//! The client is an explicitly constructed service object: the host's
//! composition root builds one, injects the runtime environment,
//! transport, session store and clock, and owns its lifecycle. No
//! lazy globals. Tracking never blocks and never surfaces errors; the
//! host drives flushing from its event loop via [`AnalyticsClient::flush_if_due`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::context::Enricher;
use crate::event::EventDraft;
use crate::queue::{BatchQueue, FlushTrigger, DEFAULT_BATCH_SIZE, DEFAULT_IDLE_DELAY, DEFAULT_REQUEUE_CAP};
use crate::runtime::{HeadlessRuntime, RuntimeEnv};
use crate::session::{MemoryStore, SessionManager, SessionStore};
use crate::transport::{HttpTransport, StaticToken, Transport, TransportConfig};

/// Configuration for the analytics client.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Master switch; disabled tracking is silently ignored
    pub enabled: bool,
    /// Queue length that triggers an immediate flush
    pub batch_size: usize,
    /// Idle delay before a partial batch is flushed
    pub idle_delay: Duration,
    /// Queue cap applied when re-queueing a failed batch
    pub requeue_cap: usize,
    /// Transport configuration
    pub transport: TransportConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            idle_delay: DEFAULT_IDLE_DELAY,
            requeue_cap: DEFAULT_REQUEUE_CAP,
            transport: TransportConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Create a config with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the collector base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.transport = TransportConfig::new(base_url).with_timeout(self.transport.timeout);
        self
    }

    /// Set the batch size threshold.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the idle flush delay.
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    /// Set the re-queue cap.
    pub fn with_requeue_cap(mut self, cap: usize) -> Self {
        self.requeue_cap = cap;
        self
    }

    /// Set the master switch.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Builder wiring the client's collaborators.
pub struct AnalyticsClientBuilder {
    config: AnalyticsConfig,
    runtime: Arc<dyn RuntimeEnv>,
    transport: Option<Arc<dyn Transport>>,
    session_store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsClientBuilder {
    fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            runtime: Arc::new(HeadlessRuntime),
            transport: None,
            session_store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Inject the runtime environment.
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeEnv>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Inject the transport (tests use mocks here).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Inject the session store.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Inject the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the client.
    pub fn build(self) -> AnalyticsClient {
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new(
                self.config.transport.clone(),
                StaticToken::none(),
            ))
        });
        let queue = BatchQueue::with_limits(
            self.config.batch_size,
            self.config.idle_delay,
            self.config.requeue_cap,
        );

        AnalyticsClient {
            enricher: Enricher::new(self.runtime),
            sessions: SessionManager::new(self.session_store, self.clock.clone()),
            queue: Mutex::new(queue),
            transport,
            clock: self.clock,
            enabled: AtomicBool::new(self.config.enabled),
            flush_requested: AtomicBool::new(false),
            events_tracked: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
        }
    }
}

/// The analytics capture pipeline: enrich, queue, dispatch.
pub struct AnalyticsClient {
    enricher: Enricher,
    sessions: SessionManager,
    queue: Mutex<BatchQueue>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    flush_requested: AtomicBool,
    events_tracked: AtomicU64,
    events_filtered: AtomicU64,
}

impl AnalyticsClient {
    /// Start building a client from the given config.
    pub fn builder(config: AnalyticsConfig) -> AnalyticsClientBuilder {
        AnalyticsClientBuilder::new(config)
    }

    /// Track an event.
    ///
    /// Returns `false` immediately, without enqueueing, when tracking
    /// is disabled. Enriches the draft, refreshes the session window
    /// and appends to the queue; when the append makes a flush due
    /// (batch full or conversion) the obligation is recorded for
    /// [`flush_if_due`](Self::flush_if_due).
    pub fn track(&self, draft: EventDraft) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            self.events_filtered.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        let mut event = self.enricher.enrich(draft, self.clock.now());
        event.session = Some(self.sessions.touch());

        let trigger = {
            let mut queue = self.queue.lock().expect("queue poisoned");
            queue.append(event, self.clock.now_ms())
        };
        if trigger.is_immediate() {
            self.flush_requested.store(true, Ordering::SeqCst);
        }
        if let FlushTrigger::ScheduleIdle(delay) = trigger {
            debug!(delay_ms = delay.as_millis() as u64, "idle flush armed");
        }

        self.events_tracked.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Whether a flush is currently due (immediate obligation or an
    /// expired idle deadline).
    pub fn flush_due(&self) -> bool {
        if self.flush_requested.load(Ordering::SeqCst) {
            return true;
        }
        let queue = self.queue.lock().expect("queue poisoned");
        queue.idle_due(self.clock.now_ms())
    }

    /// Flush when due; no-op otherwise. The host's event loop calls
    /// this after tracking and on its timer ticks.
    pub async fn flush_if_due(&self) {
        if self.flush_due() {
            self.flush().await;
        }
    }

    /// Flush the queue now.
    ///
    /// Swap-then-send: the live queue is swept into a snapshot before
    /// the network call starts, so concurrent tracking appends to a
    /// fresh queue. On failure the snapshot is re-queued ahead of any
    /// newer events, capped; the error is logged, never surfaced.
    pub async fn flush(&self) {
        self.flush_requested.store(false, Ordering::SeqCst);

        let snapshot = {
            let mut queue = self.queue.lock().expect("queue poisoned");
            queue.take_snapshot()
        };
        if snapshot.is_empty() {
            return;
        }

        match self.transport.send_batch(&snapshot).await {
            Ok(()) => {
                debug!(count = snapshot.len(), "batch flushed");
            }
            Err(e) => {
                warn!(error = %e, count = snapshot.len(), "batch send failed, re-queueing");
                let mut queue = self.queue.lock().expect("queue poisoned");
                queue.restore_failed(snapshot);
            }
        }
    }

    /// Final best-effort flush; the page-unload analogue.
    pub async fn shutdown(&self) {
        self.flush().await;
    }

    /// Enable or disable tracking at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether tracking is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of events currently queued.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().expect("queue poisoned").len()
    }

    /// Total events accepted by `track()`.
    pub fn events_tracked(&self) -> u64 {
        self.events_tracked.load(Ordering::SeqCst)
    }

    /// Total events ignored because tracking was disabled.
    pub fn events_filtered(&self) -> u64 {
        self.events_filtered.load(Ordering::SeqCst)
    }

    /// Total events dropped by the re-queue cap.
    pub fn events_dropped(&self) -> u64 {
        self.queue.lock().expect("queue poisoned").events_dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{TelemetryError, TelemetryResult};
    use crate::event::{EventDraft, TelemetryEvent};
    use futures_util::future::BoxFuture;

    /// Transport that records batches and fails on demand.
    struct MockTransport {
        batches: Mutex<Vec<Vec<TelemetryEvent>>>,
        fail: AtomicBool,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn batches(&self) -> Vec<Vec<TelemetryEvent>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn send_batch<'a>(
            &'a self,
            events: &'a [TelemetryEvent],
        ) -> BoxFuture<'a, TelemetryResult<()>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(TelemetryError::Rejected(500));
                }
                self.batches.lock().unwrap().push(events.to_vec());
                Ok(())
            })
        }
    }

    fn client_with(
        transport: Arc<MockTransport>,
        clock: ManualClock,
        config: AnalyticsConfig,
    ) -> AnalyticsClient {
        AnalyticsClient::builder(config)
            .transport(transport)
            .clock(Arc::new(clock))
            .build()
    }

    #[test]
    fn test_track_disabled_returns_false() {
        let client = client_with(
            MockTransport::new(),
            ManualClock::new(0),
            AnalyticsConfig::new().with_enabled(false),
        );

        assert!(!client.track(EventDraft::page_view()));
        assert_eq!(client.queued_len(), 0);
        assert_eq!(client.events_filtered(), 1);
        assert_eq!(client.events_tracked(), 0);
    }

    #[test]
    fn test_set_enabled_toggles_tracking() {
        let client = client_with(
            MockTransport::new(),
            ManualClock::new(0),
            AnalyticsConfig::new().with_enabled(false),
        );
        assert!(!client.track(EventDraft::page_view()));

        client.set_enabled(true);
        assert!(client.track(EventDraft::page_view()));
        assert_eq!(client.events_tracked(), 1);
    }

    #[test]
    fn test_track_attaches_session_block() {
        let transport = MockTransport::new();
        let client = client_with(transport, ManualClock::new(123), AnalyticsConfig::new());
        client.track(EventDraft::page_view());

        let queue = client.queue.lock().unwrap();
        let event = queue.events().next().unwrap();
        let session = event.session.as_ref().unwrap();
        assert!(session.is_new_session);
        assert!(session.session_id.starts_with("sess_123_"));
    }

    #[tokio::test]
    async fn test_no_flush_before_threshold_or_idle() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());

        for i in 0..9 {
            client.track(EventDraft::custom(&format!("e{i}")));
            client.flush_if_due().await;
        }
        assert!(transport.batches().is_empty());
        assert_eq!(client.queued_len(), 9);
    }

    #[tokio::test]
    async fn test_batch_full_flushes() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());

        for i in 0..10 {
            client.track(EventDraft::custom(&format!("e{i}")));
            client.flush_if_due().await;
        }
        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(client.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_conversion_flushes_immediately() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());

        client.track(EventDraft::custom("warmup"));
        client.flush_if_due().await;
        assert!(transport.batches().is_empty());

        client.track(EventDraft::conversion("signup", Some(9.0)));
        client.flush_if_due().await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_idle_deadline_flushes() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(0);
        let client = client_with(transport.clone(), clock.clone(), AnalyticsConfig::new());

        client.track(EventDraft::custom("lonely"));
        client.flush_if_due().await;
        assert!(transport.batches().is_empty());

        clock.advance(5_000);
        assert!(client.flush_due());
        client.flush_if_due().await;
        assert_eq!(transport.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_in_front() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());

        client.track(EventDraft::custom("first"));
        client.track(EventDraft::custom("second"));
        transport.set_fail(true);
        client.flush().await;

        // Nothing sent, both events back in the queue, oldest first.
        assert!(transport.batches().is_empty());
        assert_eq!(client.queued_len(), 2);
        {
            let queue = client.queue.lock().unwrap();
            let names: Vec<_> = queue
                .events()
                .map(|e| e.event_name.clone().unwrap())
                .collect();
            assert_eq!(names, vec!["first", "second"]);
        }

        transport.set_fail(false);
        client.flush().await;
        assert_eq!(transport.batches().len(), 1);
        assert_eq!(client.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_requeue_cap_drops_oldest() {
        let transport = MockTransport::new();
        let client = client_with(
            transport.clone(),
            ManualClock::new(0),
            AnalyticsConfig::new()
                .with_batch_size(100)
                .with_requeue_cap(3),
        );

        for i in 0..5 {
            client.track(EventDraft::custom(&format!("e{i}")));
        }
        transport.set_fail(true);
        client.flush().await;

        assert_eq!(client.queued_len(), 3);
        assert_eq!(client.events_dropped(), 2);
        let queue = client.queue.lock().unwrap();
        let names: Vec<_> = queue
            .events()
            .map(|e| e.event_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remainder() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());

        client.track(EventDraft::custom("tail"));
        client.shutdown().await;

        assert_eq!(transport.batches().len(), 1);
        assert_eq!(client.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_empty_queue_is_noop() {
        let transport = MockTransport::new();
        let client = client_with(transport.clone(), ManualClock::new(0), AnalyticsConfig::new());
        client.flush().await;
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = AnalyticsConfig::new()
            .with_base_url("https://collector.test")
            .with_batch_size(25)
            .with_idle_delay(Duration::from_secs(2))
            .with_requeue_cap(99)
            .with_enabled(false);

        assert_eq!(config.transport.base_url, "https://collector.test");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.idle_delay, Duration::from_secs(2));
        assert_eq!(config.requeue_cap, 99);
        assert!(!config.enabled);
    }
}
