//! Error types for the telemetry subsystem.

use thiserror::Error;

/// Errors that can occur in the telemetry subsystem.
///
/// None of these cross the public tracking surface: `track()` and the
/// stream client contain failures internally. The variants exist for
/// the internal seams (transport, stream source) and for tests.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to serialize an event or parse a stream payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure (connection refused, DNS, TLS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The collector answered with a non-2xx status
    #[error("Collector rejected batch with status {0}")]
    Rejected(u16),

    /// Tracking is disabled by configuration
    #[error("Tracking is disabled")]
    Disabled,

    /// The realtime stream ended from the server side
    #[error("Event stream closed by server")]
    StreamClosed,

    /// The reconnect attempt budget is exhausted
    #[error("Reconnect attempts exhausted after {0} tries")]
    RetriesExhausted(u32),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
