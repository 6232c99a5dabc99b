//! Runtime environment capability interface.
//!
//! The enricher needs ambient facts (current page, user agent, screen
//! geometry, navigation timing) that only exist when the pipeline runs
//! embedded in a UI shell. Rather than probing for those capabilities
//! at every call site, the host picks an implementation of
//! [`RuntimeEnv`] at construction time: a fixture-backed
//! [`StaticRuntime`] when embedded, or [`HeadlessRuntime`] everywhere
//! else. Every accessor is optional; downstream code degrades to safe
//! defaults on `None`.

/// Facts about the page currently displayed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    /// Full URL including the query string
    pub url: String,
    /// Path component only
    pub path: String,
    /// Document title
    pub title: String,
    /// Referrer URL, empty if direct
    pub referrer: String,
}

/// Raw navigation/paint timing readings in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingSnapshot {
    /// Total page load duration
    pub page_load_ms: f64,
    /// DOM-content-loaded duration
    pub dom_content_loaded_ms: f64,
    /// First paint mark, if recorded
    pub first_paint_ms: Option<f64>,
    /// First contentful paint mark, if recorded
    pub first_contentful_paint_ms: Option<f64>,
}

/// Ambient environment capabilities, resolved at construction time.
pub trait RuntimeEnv: Send + Sync {
    /// The page currently displayed, if any.
    fn page(&self) -> Option<PageSnapshot> {
        None
    }

    /// The host's user-agent string, if any.
    fn user_agent(&self) -> Option<String> {
        None
    }

    /// Physical screen dimensions (width, height).
    fn screen_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Visible viewport dimensions (width, height).
    fn viewport_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// BCP-47 language tag of the host locale.
    fn language(&self) -> Option<String> {
        None
    }

    /// IANA timezone name of the host.
    fn timezone(&self) -> Option<String> {
        None
    }

    /// Navigation/paint timing readings, if the host records them.
    fn navigation_timing(&self) -> Option<TimingSnapshot> {
        None
    }
}

/// Runtime with no ambient capabilities.
///
/// Used in headless hosts and server-side contexts; every enrichment
/// block downstream falls back to its defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessRuntime;

impl RuntimeEnv for HeadlessRuntime {}

/// Runtime backed by explicitly supplied values.
///
/// Embedding hosts construct one of these from their own window state
/// and refresh it on navigation. Tests use it as a fixture.
#[derive(Debug, Clone, Default)]
pub struct StaticRuntime {
    page: Option<PageSnapshot>,
    user_agent: Option<String>,
    screen: Option<(u32, u32)>,
    viewport: Option<(u32, u32)>,
    language: Option<String>,
    timezone: Option<String>,
    timing: Option<TimingSnapshot>,
}

impl StaticRuntime {
    /// Create an empty static runtime (equivalent to headless).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current page.
    pub fn with_page(mut self, url: &str, path: &str, title: &str, referrer: &str) -> Self {
        self.page = Some(PageSnapshot {
            url: url.to_string(),
            path: path.to_string(),
            title: title.to_string(),
            referrer: referrer.to_string(),
        });
        self
    }

    /// Set the user-agent string.
    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Set screen dimensions.
    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen = Some((width, height));
        self
    }

    /// Set viewport dimensions.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some((width, height));
        self
    }

    /// Set the locale language tag.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Set the timezone name.
    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = Some(timezone.to_string());
        self
    }

    /// Set navigation timing readings.
    pub fn with_timing(mut self, timing: TimingSnapshot) -> Self {
        self.timing = Some(timing);
        self
    }
}

impl RuntimeEnv for StaticRuntime {
    fn page(&self) -> Option<PageSnapshot> {
        self.page.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        self.screen
    }

    fn viewport_size(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    fn language(&self) -> Option<String> {
        self.language.clone()
    }

    fn timezone(&self) -> Option<String> {
        self.timezone.clone()
    }

    fn navigation_timing(&self) -> Option<TimingSnapshot> {
        self.timing
    }
}
