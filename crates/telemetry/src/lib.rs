//! Telemetry Subsystem
//!
//! Client-side event capture, enrichment, batching and dispatch, plus
//! a resilient realtime audit-event stream client. The pipeline gets
//! structured events to a remote collector without blocking the host
//! application, tolerates transient network failure with a bounded
//! re-queue, and never grows without bound during an outage.
//!
//! # Architecture
//!
//! Producers (explicit `track()` calls or the auto-instrumentation
//! hooks) feed drafts through the context enricher into the batching
//! queue; the dispatcher sends batches to the collector. Independently,
//! the realtime client subscribes to the collector's server-sent-event
//! feed with linear-backoff reconnects.
//!
//! All timing decisions go through an injectable [`Clock`], ambient
//! environment facts through a [`RuntimeEnv`], and the network seams
//! through the [`Transport`] and [`realtime::StreamSource`] traits, so
//! the whole pipeline is testable without timers or sockets.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use telemetry::{AnalyticsClient, AnalyticsConfig, EventDraft, StaticRuntime};
//!
//! let runtime = StaticRuntime::new()
//!     .with_page("https://app.example.com/dash", "/dash", "Dashboard", "");
//!
//! let client = AnalyticsClient::builder(
//!     AnalyticsConfig::new().with_base_url("https://collector.example.com"),
//! )
//! .runtime(Arc::new(runtime))
//! .build();
//!
//! client.track(EventDraft::page_view());
//! client.track(EventDraft::conversion("signup", Some(49.0)));
//! ```
//!
//! # Modules
//!
//! - [`event`] - Event model and enrichment block types
//! - [`context`] - Context enricher (device, browser, UTM, timing)
//! - [`session`] - Sliding-window session identity
//! - [`queue`] - Batching queue state machine
//! - [`transport`] - Batch dispatch and token resolution
//! - [`client`] - High-level analytics client
//! - [`hooks`] - Auto-instrumentation signal producers
//! - [`realtime`] - Reconnecting audit stream client
//! - [`export`] - Export/query façade
//! - [`runtime`] - Runtime environment capability interface
//! - [`clock`] - Injectable clock
//! - [`error`] - Error types

mod client;
pub mod clock;
pub mod context;
mod error;
mod event;
pub mod export;
pub mod hooks;
mod queue;
pub mod realtime;
pub mod runtime;
mod session;
mod transport;

pub use client::{AnalyticsClient, AnalyticsClientBuilder, AnalyticsConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::Enricher;
pub use error::{TelemetryError, TelemetryResult};
pub use event::{
    ConversionContext, DeviceContext, DeviceType, EventDraft, EventKind, PageContext,
    PerformanceContext, SessionContext, TelemetryEvent, UtmContext,
};
pub use export::{AuditQuery, ExportClient, ExportFormat, ExportRequest};
pub use hooks::{Instrumenter, ScrollDepthTracker, UiSignal};
pub use queue::{BatchQueue, FlushTrigger};
pub use realtime::{AuditLogEntry, AuditStreamClient, ReconnectPolicy, StreamStatus, Subscription};
pub use runtime::{HeadlessRuntime, RuntimeEnv, StaticRuntime, TimingSnapshot};
pub use session::{MemoryStore, SessionManager, SessionStore};
pub use transport::{
    HttpTransport, StaticToken, TokenChain, TokenSource, Transport, TransportConfig,
};
