//! Auto-instrumentation hooks.
//!
//! Pure producers: each UI signal from the host shell is translated
//! into a `track()` call on the client. The instrumenter only observes
//! between explicit [`start`](Instrumenter::start) and
//! [`stop`](Instrumenter::stop) calls; nothing is registered as a
//! hidden side effect of construction. A failure inside one hook is
//! contained and logged so the remaining hooks still fire.

use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::client::AnalyticsClient;
use crate::clock::Clock;
use crate::event::{EventDraft, EventKind};

/// Scroll-depth milestones, in percent of page height.
pub const SCROLL_MILESTONES: &[u8] = &[25, 50, 75, 100];

/// Dwell-time marks, in seconds after `start()`.
pub const DWELL_MARKS_SECS: &[u64] = &[30, 60, 120, 300];

/// A UI signal delivered by the host shell.
#[derive(Debug, Clone)]
pub enum UiSignal {
    /// A `button` or `a` element was clicked.
    Click {
        /// Visible text or aria-label, whichever the host resolved
        text: String,
        /// Element tag name
        tag: String,
        /// Element class attribute
        classes: String,
        /// Element id attribute
        id: String,
    },
    /// A form was submitted.
    FormSubmit {
        name: String,
        id: String,
        classes: String,
        action: String,
        method: String,
    },
    /// The page scrolled; position as percent of total height.
    Scroll { percent: u8 },
    /// The page is being torn down.
    Unload,
}

/// Emits each 25% scroll milestone at most once, monotonically.
#[derive(Debug, Default)]
pub struct ScrollDepthTracker {
    highest_emitted: u8,
}

impl ScrollDepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scroll position; returns the milestones newly crossed,
    /// in increasing order. Scrolling back up never re-emits.
    pub fn record(&mut self, percent: u8) -> Vec<u8> {
        let reached: Vec<u8> = SCROLL_MILESTONES
            .iter()
            .copied()
            .filter(|m| *m <= percent.min(100) && *m > self.highest_emitted)
            .collect();
        if let Some(max) = reached.last() {
            self.highest_emitted = *max;
        }
        reached
    }

    /// Highest milestone emitted so far.
    pub fn highest(&self) -> u8 {
        self.highest_emitted
    }
}

/// Tracks which dwell marks have fired for the current page.
#[derive(Debug)]
struct DwellState {
    started_ms: u64,
    emitted: Vec<u64>,
}

impl DwellState {
    fn new(now_ms: u64) -> Self {
        Self {
            started_ms: now_ms,
            emitted: Vec::new(),
        }
    }

    /// Marks whose threshold has elapsed and which have not fired yet.
    fn due(&mut self, now_ms: u64) -> Vec<u64> {
        let elapsed_secs = now_ms.saturating_sub(self.started_ms) / 1000;
        let due: Vec<u64> = DWELL_MARKS_SECS
            .iter()
            .copied()
            .filter(|mark| *mark <= elapsed_secs && !self.emitted.contains(mark))
            .collect();
        self.emitted.extend(&due);
        due
    }

    fn dwell_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms) / 1000
    }
}

/// Translates host UI signals into tracked events.
pub struct Instrumenter {
    client: Arc<AnalyticsClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<InstrumenterState>>,
}

struct InstrumenterState {
    scroll: ScrollDepthTracker,
    dwell: DwellState,
}

impl Instrumenter {
    /// Create an instrumenter feeding the given client. Inactive until
    /// [`start`](Self::start) is called.
    pub fn new(client: Arc<AnalyticsClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            state: Mutex::new(None),
        }
    }

    /// Begin observing; resets scroll milestones and dwell marks.
    pub fn start(&self) {
        let mut state = self.state.lock().expect("instrumenter poisoned");
        *state = Some(InstrumenterState {
            scroll: ScrollDepthTracker::new(),
            dwell: DwellState::new(self.clock.now_ms()),
        });
    }

    /// Stop observing and emit the final page-exit event with the
    /// wall-clock dwell delta. Idempotent.
    pub fn stop(&self) {
        let taken = self.state.lock().expect("instrumenter poisoned").take();
        if let Some(state) = taken {
            let dwell_secs = state.dwell.dwell_secs(self.clock.now_ms());
            self.client.track(
                EventDraft::custom("page_exit")
                    .with_category("engagement")
                    .with_property("dwell_seconds", dwell_secs),
            );
        }
    }

    /// Whether the instrumenter is currently observing.
    pub fn is_active(&self) -> bool {
        self.state.lock().expect("instrumenter poisoned").is_some()
    }

    /// Deliver a UI signal. Signals while stopped are ignored.
    pub fn observe(&self, signal: UiSignal) {
        if !self.is_active() {
            return;
        }
        match signal {
            UiSignal::Click { text, tag, classes, id } => {
                self.client.track(
                    EventDraft::new(EventKind::Click)
                        .with_category("interaction")
                        .with_name("element_click")
                        .with_property("text", text)
                        .with_property("tag", tag)
                        .with_property("classes", classes)
                        .with_property("id", id),
                );
            }
            UiSignal::FormSubmit { name, id, classes, action, method } => {
                self.client.track(
                    EventDraft::new(EventKind::FormSubmission)
                        .with_category("form")
                        .with_name("form_submit")
                        .with_property("form_name", name)
                        .with_property("form_id", id)
                        .with_property("form_classes", classes)
                        .with_property("form_action", action)
                        .with_property("form_method", method),
                );
            }
            UiSignal::Scroll { percent } => {
                let milestones = {
                    let mut state = self.state.lock().expect("instrumenter poisoned");
                    match state.as_mut() {
                        Some(s) => s.scroll.record(percent),
                        None => Vec::new(),
                    }
                };
                for milestone in milestones {
                    self.client.track(
                        EventDraft::custom("scroll_depth")
                            .with_category("engagement")
                            .with_property("depth_percent", milestone),
                    );
                }
            }
            UiSignal::Unload => self.stop(),
        }
    }

    /// Emit any dwell-time marks whose threshold has elapsed. The host
    /// calls this from its timer tick; the clock decides what is due.
    pub fn poll_dwell(&self) {
        let due = {
            let mut state = self.state.lock().expect("instrumenter poisoned");
            match state.as_mut() {
                Some(s) => s.dwell.due(self.clock.now_ms()),
                None => Vec::new(),
            }
        };
        for mark in due {
            let tracked = self.client.track(
                EventDraft::custom("dwell_time")
                    .with_category("engagement")
                    .with_property("seconds", mark),
            );
            if !tracked {
                warn!(mark, "dwell event not tracked (tracking disabled)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AnalyticsClient, AnalyticsConfig};
    use crate::clock::ManualClock;
    use crate::error::TelemetryResult;
    use crate::event::TelemetryEvent;
    use futures_util::future::BoxFuture;
    use crate::transport::Transport;

    struct NullTransport;

    impl Transport for NullTransport {
        fn send_batch<'a>(
            &'a self,
            _events: &'a [TelemetryEvent],
        ) -> BoxFuture<'a, TelemetryResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn setup(clock: ManualClock) -> (Arc<AnalyticsClient>, Instrumenter) {
        let client = Arc::new(
            AnalyticsClient::builder(AnalyticsConfig::new().with_batch_size(1000))
                .transport(Arc::new(NullTransport))
                .clock(Arc::new(clock.clone()))
                .build(),
        );
        let instrumenter = Instrumenter::new(client.clone(), Arc::new(clock));
        (client, instrumenter)
    }

    #[test]
    fn test_scroll_tracker_milestones() {
        let mut tracker = ScrollDepthTracker::new();
        assert_eq!(tracker.record(10), Vec::<u8>::new());
        assert_eq!(tracker.record(30), vec![25]);
        assert_eq!(tracker.record(30), Vec::<u8>::new());
        assert_eq!(tracker.record(55), vec![50]);
    }

    #[test]
    fn test_scroll_tracker_jump_emits_each_once() {
        let mut tracker = ScrollDepthTracker::new();
        assert_eq!(tracker.record(80), vec![25, 50, 75]);
        assert_eq!(tracker.record(100), vec![100]);
        assert_eq!(tracker.record(100), Vec::<u8>::new());
    }

    #[test]
    fn test_scroll_tracker_never_decreases() {
        let mut tracker = ScrollDepthTracker::new();
        tracker.record(55);
        assert_eq!(tracker.highest(), 50);
        // Scrolling back up must not re-emit lower milestones.
        assert_eq!(tracker.record(10), Vec::<u8>::new());
        assert_eq!(tracker.record(40), Vec::<u8>::new());
        assert_eq!(tracker.highest(), 50);
    }

    #[test]
    fn test_scroll_tracker_clamps_over_100() {
        let mut tracker = ScrollDepthTracker::new();
        assert_eq!(tracker.record(250), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_signals_ignored_before_start() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.observe(UiSignal::Scroll { percent: 60 });
        assert_eq!(client.events_tracked(), 0);
    }

    #[test]
    fn test_click_and_submit_signals() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.start();

        instrumenter.observe(UiSignal::Click {
            text: "Export".to_string(),
            tag: "button".to_string(),
            classes: "btn btn-primary".to_string(),
            id: "export-btn".to_string(),
        });
        instrumenter.observe(UiSignal::FormSubmit {
            name: "settings".to_string(),
            id: "settings-form".to_string(),
            classes: String::new(),
            action: "/settings".to_string(),
            method: "post".to_string(),
        });

        assert_eq!(client.events_tracked(), 2);
    }

    #[test]
    fn test_scroll_signal_emits_milestones() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.start();

        instrumenter.observe(UiSignal::Scroll { percent: 10 });
        assert_eq!(client.events_tracked(), 0);

        instrumenter.observe(UiSignal::Scroll { percent: 55 });
        assert_eq!(client.events_tracked(), 2); // 25 and 50

        instrumenter.observe(UiSignal::Scroll { percent: 55 });
        assert_eq!(client.events_tracked(), 2);
    }

    #[test]
    fn test_dwell_marks_fire_once() {
        let clock = ManualClock::new(0);
        let (client, instrumenter) = setup(clock.clone());
        instrumenter.start();

        instrumenter.poll_dwell();
        assert_eq!(client.events_tracked(), 0);

        clock.advance(30_000);
        instrumenter.poll_dwell();
        assert_eq!(client.events_tracked(), 1);

        // Same mark does not refire; next mark fires at 60s.
        instrumenter.poll_dwell();
        assert_eq!(client.events_tracked(), 1);

        clock.advance(30_000);
        instrumenter.poll_dwell();
        assert_eq!(client.events_tracked(), 2);
    }

    #[test]
    fn test_dwell_catch_up_after_long_gap() {
        let clock = ManualClock::new(0);
        let (client, instrumenter) = setup(clock.clone());
        instrumenter.start();

        clock.advance(400_000); // past all four marks
        instrumenter.poll_dwell();
        assert_eq!(client.events_tracked(), 4);
    }

    #[test]
    fn test_stop_emits_page_exit_with_dwell() {
        let clock = ManualClock::new(0);
        let (client, instrumenter) = setup(clock.clone());
        instrumenter.start();

        clock.advance(42_000);
        instrumenter.stop();

        assert_eq!(client.events_tracked(), 1);
        assert!(!instrumenter.is_active());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.start();
        instrumenter.stop();
        instrumenter.stop();
        assert_eq!(client.events_tracked(), 1);
    }

    #[test]
    fn test_unload_signal_stops() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.start();
        instrumenter.observe(UiSignal::Unload);

        assert!(!instrumenter.is_active());
        assert_eq!(client.events_tracked(), 1); // page_exit

        // Signals after unload are ignored.
        instrumenter.observe(UiSignal::Scroll { percent: 90 });
        assert_eq!(client.events_tracked(), 1);
    }

    #[test]
    fn test_restart_resets_milestones() {
        let (client, instrumenter) = setup(ManualClock::new(0));
        instrumenter.start();
        instrumenter.observe(UiSignal::Scroll { percent: 55 });
        instrumenter.stop();

        instrumenter.start();
        instrumenter.observe(UiSignal::Scroll { percent: 30 });
        // 2 scroll + 1 page_exit + 1 scroll after restart
        assert_eq!(client.events_tracked(), 4);
    }
}
