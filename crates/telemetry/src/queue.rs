//! Event batching queue.
//!
//! The queue is a pure state machine: appending reports which flush
//! obligation the caller now has, and flushing follows the
//! swap-then-send pattern. The live queue is swapped out before the
//! network call starts, so a `track()` arriving while a send is in
//! flight appends to a fresh queue instead of racing the snapshot.
//! A failed snapshot is prepended back ahead of newer events and the
//! total is capped; overflow is dropped oldest-first.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

use crate::event::TelemetryEvent;

/// Default number of events that triggers an immediate flush.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default idle delay before a partial batch is flushed.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(5);
/// Default cap applied when re-queueing after a failed send.
pub const DEFAULT_REQUEUE_CAP: usize = 50;

/// What the caller must do after appending an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The queue reached the batch size; flush now.
    BatchFull,
    /// A conversion event was appended; flush now.
    Conversion,
    /// Flush once the idle delay elapses. Scheduling is idempotent:
    /// returned only when no idle deadline was already armed.
    ScheduleIdle(Duration),
    /// An idle deadline is already armed; nothing to do.
    Pending,
}

impl FlushTrigger {
    /// Whether the trigger demands an immediate flush.
    pub fn is_immediate(&self) -> bool {
        matches!(self, FlushTrigger::BatchFull | FlushTrigger::Conversion)
    }
}

/// Bounded, ordered queue of events awaiting dispatch.
#[derive(Debug)]
pub struct BatchQueue {
    events: VecDeque<TelemetryEvent>,
    batch_size: usize,
    idle_delay: Duration,
    requeue_cap: usize,
    /// Epoch-millis deadline of the armed idle flush, if any.
    idle_deadline_ms: Option<u64>,
    events_dropped: u64,
}

impl BatchQueue {
    /// Create a queue with the default thresholds.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BATCH_SIZE, DEFAULT_IDLE_DELAY, DEFAULT_REQUEUE_CAP)
    }

    /// Create a queue with explicit thresholds.
    pub fn with_limits(batch_size: usize, idle_delay: Duration, requeue_cap: usize) -> Self {
        Self {
            events: VecDeque::new(),
            batch_size,
            idle_delay,
            requeue_cap,
            idle_deadline_ms: None,
            events_dropped: 0,
        }
    }

    /// Append an event and report the resulting flush obligation.
    pub fn append(&mut self, event: TelemetryEvent, now_ms: u64) -> FlushTrigger {
        let conversion = event.is_conversion();
        self.events.push_back(event);

        if conversion {
            return FlushTrigger::Conversion;
        }
        if self.events.len() >= self.batch_size {
            return FlushTrigger::BatchFull;
        }
        if self.idle_deadline_ms.is_some() {
            return FlushTrigger::Pending;
        }
        self.idle_deadline_ms = Some(now_ms + self.idle_delay.as_millis() as u64);
        FlushTrigger::ScheduleIdle(self.idle_delay)
    }

    /// Whether the armed idle deadline has passed.
    pub fn idle_due(&self, now_ms: u64) -> bool {
        matches!(self.idle_deadline_ms, Some(deadline) if now_ms >= deadline)
    }

    /// The armed idle deadline, if any.
    pub fn idle_deadline_ms(&self) -> Option<u64> {
        self.idle_deadline_ms
    }

    /// Atomically sweep the whole queue into a snapshot for sending.
    ///
    /// Clears the live queue and disarms the idle deadline; events
    /// appended while the snapshot is in flight land in a fresh queue.
    pub fn take_snapshot(&mut self) -> Vec<TelemetryEvent> {
        self.idle_deadline_ms = None;
        self.events.drain(..).collect()
    }

    /// Put a failed snapshot back ahead of any newer events.
    ///
    /// The combined queue is capped; overflow is dropped oldest-first
    /// so retry order survives without unbounded growth during a
    /// sustained outage.
    pub fn restore_failed(&mut self, snapshot: Vec<TelemetryEvent>) {
        for event in snapshot.into_iter().rev() {
            self.events.push_front(event);
        }
        let overflow = self.events.len().saturating_sub(self.requeue_cap);
        if overflow > 0 {
            self.events.drain(..overflow);
            self.events_dropped += overflow as u64;
            warn!(dropped = overflow, cap = self.requeue_cap, "batch queue over cap, dropping oldest events");
        }
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events dropped by the re-queue cap.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped
    }

    /// Discard all queued events and disarm the idle deadline.
    pub fn clear(&mut self) {
        self.events.clear();
        self.idle_deadline_ms = None;
    }

    /// Peek at the queued events in order (tests and diagnostics).
    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.events.iter()
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
