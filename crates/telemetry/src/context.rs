//! Context enrichment.
//!
//! [`Enricher::enrich`] turns a producer draft into a full
//! [`TelemetryEvent`] by attaching page, UTM, device and performance
//! blocks derived from the runtime environment. Enrichment never
//! fails: every block degrades to safe defaults or is omitted when the
//! runtime does not expose the needed capability.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::sync::Arc;

use crate::event::{
    DeviceContext, DeviceType, EventDraft, PageContext, PerformanceContext, TelemetryEvent,
    UtmContext,
};
use crate::runtime::RuntimeEnv;

/// Tablet patterns are checked before mobile patterns so a tablet UA
/// that also matches a generic mobile substring classifies as tablet.
const TABLET_PATTERNS: &[&str] = &["ipad", "tablet", "kindle", "silk", "playbook"];
const MOBILE_PATTERNS: &[&str] = &[
    "mobile",
    "iphone",
    "ipod",
    "android",
    "blackberry",
    "windows phone",
];

/// Derives enrichment blocks from the ambient runtime.
pub struct Enricher {
    runtime: Arc<dyn RuntimeEnv>,
}

impl Enricher {
    /// Create an enricher over the given runtime environment.
    pub fn new(runtime: Arc<dyn RuntimeEnv>) -> Self {
        Self { runtime }
    }

    /// Enrich a draft into a complete event stamped with `now`.
    ///
    /// The session block is attached by the client, which owns the
    /// session manager; everything else is resolved here.
    pub fn enrich(&self, draft: EventDraft, now: DateTime<Utc>) -> TelemetryEvent {
        let mut event = TelemetryEvent::from_draft(draft, now);

        event.page = self.page_block();
        event.utm = self.utm_block();
        event.device = Some(self.device_block());
        event.performance = self.performance_block();

        event
    }

    fn page_block(&self) -> Option<PageContext> {
        self.runtime.page().map(|p| PageContext {
            url: p.url,
            path: p.path,
            title: p.title,
            referrer: p.referrer,
        })
    }

    /// UTM block from the page URL query string; omitted entirely when
    /// no `utm_*` key is present.
    fn utm_block(&self) -> Option<UtmContext> {
        let page = self.runtime.page()?;
        let utm = parse_utm(&page.url);
        if utm.is_empty() {
            None
        } else {
            Some(utm)
        }
    }

    fn device_block(&self) -> DeviceContext {
        let ua = self.runtime.user_agent().unwrap_or_default();
        let (browser, browser_version) = detect_browser(&ua);
        let (os, os_version) = detect_os(&ua);
        let (screen_width, screen_height) = self.runtime.screen_size().unwrap_or((0, 0));
        let (viewport_width, viewport_height) = self.runtime.viewport_size().unwrap_or((0, 0));

        DeviceContext {
            device_type: classify_device(&ua),
            browser,
            browser_version,
            os,
            os_version,
            screen_width,
            screen_height,
            viewport_width,
            viewport_height,
            language: self.runtime.language().unwrap_or_else(|| "unknown".to_string()),
            timezone: self.runtime.timezone().unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Performance block; omitted when the runtime records no timing or
    /// the core durations are non-positive.
    fn performance_block(&self) -> Option<PerformanceContext> {
        let t = self.runtime.navigation_timing()?;
        if t.page_load_ms <= 0.0 || t.dom_content_loaded_ms <= 0.0 {
            return None;
        }
        Some(PerformanceContext {
            page_load_time_ms: t.page_load_ms,
            dom_content_loaded_ms: t.dom_content_loaded_ms,
            first_paint_ms: t.first_paint_ms.filter(|v| *v > 0.0),
            first_contentful_paint_ms: t.first_contentful_paint_ms.filter(|v| *v > 0.0),
        })
    }
}

/// Classify a user agent as tablet, mobile or desktop.
///
/// Tablet patterns have priority; an empty or unrecognized UA is
/// treated as desktop.
pub fn classify_device(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    if TABLET_PATTERNS.iter().any(|p| ua.contains(p)) {
        return DeviceType::Tablet;
    }
    if MOBILE_PATTERNS.iter().any(|p| ua.contains(p)) {
        return DeviceType::Mobile;
    }
    DeviceType::Desktop
}

/// Detect browser name and version by ordered substring checks.
///
/// The order (Chrome, Firefox, Safari, Edge) matches the collector's
/// historical classification; unmatched input yields `"Unknown"`.
pub fn detect_browser(user_agent: &str) -> (String, String) {
    let checks: &[(&str, &str, &str)] = &[
        ("Chrome", "Chrome", r"Chrome/([0-9.]+)"),
        ("Firefox", "Firefox", r"Firefox/([0-9.]+)"),
        ("Safari", "Safari", r"Version/([0-9.]+)"),
        ("Edge", "Edg", r"Edg/([0-9.]+)"),
    ];

    for (name, needle, pattern) in checks {
        if user_agent.contains(needle) {
            return ((*name).to_string(), extract_version(user_agent, pattern));
        }
    }
    ("Unknown".to_string(), "Unknown".to_string())
}

/// Detect operating system name and version by ordered substring checks.
///
/// Needles are chosen so the later arms stay reachable: `Macintosh`
/// rather than `Mac OS X` (iPhone UAs carry the latter) and `X11`
/// rather than `Linux` (Android UAs carry the latter).
pub fn detect_os(user_agent: &str) -> (String, String) {
    let checks: &[(&str, &str, &str)] = &[
        ("Windows", "Windows", r"Windows NT ([0-9.]+)"),
        ("macOS", "Macintosh", r"Mac OS X ([0-9_.]+)"),
        ("Linux", "X11", r"Linux"),
        ("Android", "Android", r"Android ([0-9.]+)"),
        ("iOS", "like Mac OS X", r"OS ([0-9_]+) like Mac"),
    ];

    for (name, needle, pattern) in checks {
        if user_agent.contains(needle) {
            let version = if *name == "Linux" {
                "Unknown".to_string()
            } else {
                extract_version(user_agent, pattern).replace('_', ".")
            };
            return ((*name).to_string(), version);
        }
    }
    ("Unknown".to_string(), "Unknown".to_string())
}

fn extract_version(user_agent: &str, pattern: &str) -> String {
    Regex::new(pattern)
        .ok()
        .and_then(|re| {
            re.captures(user_agent)
                .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Extract UTM attribution keys from a URL's query string.
pub fn parse_utm(url: &str) -> UtmContext {
    let mut utm = UtmContext::default();
    let Some(query) = url.splitn(2, '?').nth(1) else {
        return utm;
    };
    // Strip any fragment before parsing pairs.
    let query = query.splitn(2, '#').next().unwrap_or("");

    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let raw = parts.next().unwrap_or("");
        let value = urlencoding::decode(raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if value.is_empty() {
            continue;
        }
        match key {
            "utm_source" => utm.source = Some(value),
            "utm_medium" => utm.medium = Some(value),
            "utm_campaign" => utm.campaign = Some(value),
            "utm_term" => utm.term = Some(value),
            "utm_content" => utm.content = Some(value),
            _ => {}
        }
    }
    utm
}
