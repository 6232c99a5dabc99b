//! Telemetry event model.
//!
//! A [`TelemetryEvent`] is the unit of work in the pipeline: producers
//! build an [`EventDraft`], the enricher attaches the ambient context
//! blocks, and the result is immutable from the moment it is enqueued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Category of a telemetry event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A page was displayed
    PageView,
    /// An interactive element was clicked
    Click,
    /// A form was submitted
    FormSubmission,
    /// A business-critical conversion; bypasses batching delay
    Conversion,
    /// Caller-defined event
    Custom,
    /// An error surfaced to the user
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::PageView => "page_view",
            EventKind::Click => "click",
            EventKind::FormSubmission => "form_submission",
            EventKind::Conversion => "conversion",
            EventKind::Custom => "custom",
            EventKind::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Page context attached at enrichment time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub url: String,
    pub path: String,
    pub title: String,
    pub referrer: String,
}

/// Campaign attribution parameters lifted from the page URL.
///
/// The whole block is omitted when no `utm_*` key is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UtmContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UtmContext {
    /// Whether any attribution key is set.
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Three-way device classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        };
        write!(f, "{s}")
    }
}

/// Device and user-agent context attached at enrichment time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContext {
    pub device_type: DeviceType,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub language: String,
    pub timezone: String,
}

/// Session identity context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub is_new_session: bool,
}

/// Conversion details supplied by the producer, passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversionContext {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Page timing metrics attached at enrichment time.
///
/// Omitted entirely when the runtime has no timing data or the
/// durations are non-positive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceContext {
    pub page_load_time_ms: f64,
    pub dom_content_loaded_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_paint_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_contentful_paint_ms: Option<f64>,
}

/// A fully enriched telemetry event, immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Unique identifier for this event
    pub event_id: String,
    /// Event category
    pub event_type: EventKind,
    /// Free-form classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_category: Option<String>,
    /// Free-form label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Schema-less payload
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm: Option<UtmContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceContext>,
}

/// A producer-supplied event before enrichment.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub kind: Option<EventKind>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub properties: HashMap<String, Value>,
    pub conversion: Option<ConversionContext>,
}

impl EventDraft {
    /// Create a draft of the given kind.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Draft for a page view.
    pub fn page_view() -> Self {
        Self::new(EventKind::PageView).with_category("navigation")
    }

    /// Draft for a click on an interactive element.
    pub fn click(name: &str) -> Self {
        Self::new(EventKind::Click)
            .with_category("interaction")
            .with_name(name)
    }

    /// Draft for a conversion goal, the only kind that bypasses batching.
    pub fn conversion(goal: &str, value: Option<f64>) -> Self {
        let mut draft = Self::new(EventKind::Conversion).with_category("conversion");
        draft.conversion = Some(ConversionContext {
            goal: goal.to_string(),
            value,
            currency: None,
        });
        draft
    }

    /// Draft for a caller-defined event.
    pub fn custom(name: &str) -> Self {
        Self::new(EventKind::Custom).with_name(name)
    }

    /// Set the category label.
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Set the name label.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Add a payload property.
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// The effective kind, defaulting to `Custom`.
    pub fn kind(&self) -> EventKind {
        self.kind.unwrap_or(EventKind::Custom)
    }
}

impl TelemetryEvent {
    /// Assemble an event from a draft plus a timestamp.
    ///
    /// Context blocks start empty; the enricher populates them.
    pub fn from_draft(draft: EventDraft, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: draft.kind(),
            event_category: draft.category,
            event_name: draft.name,
            event_description: draft.description,
            timestamp,
            properties: draft.properties,
            page: None,
            utm: None,
            device: None,
            session: None,
            conversion: draft.conversion,
            performance: None,
        }
    }

    /// Whether this event must flush the queue immediately.
    pub fn is_conversion(&self) -> bool {
        self.event_type == EventKind::Conversion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::PageView).unwrap(),
            "\"page_view\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::FormSubmission).unwrap(),
            "\"form_submission\""
        );

        let kind: EventKind = serde_json::from_str("\"conversion\"").unwrap();
        assert_eq!(kind, EventKind::Conversion);
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Click.to_string(), "click");
        assert_eq!(EventKind::Error.to_string(), "error");
    }

    #[test]
    fn test_draft_builders() {
        let draft = EventDraft::custom("report_generated")
            .with_category("reports")
            .with_description("User generated a PDF report")
            .with_property("report_kind", "pdf");

        assert_eq!(draft.kind(), EventKind::Custom);
        assert_eq!(draft.category.as_deref(), Some("reports"));
        assert_eq!(
            draft.properties.get("report_kind"),
            Some(&Value::String("pdf".to_string()))
        );
    }

    #[test]
    fn test_conversion_draft() {
        let draft = EventDraft::conversion("signup", Some(49.0));
        assert_eq!(draft.kind(), EventKind::Conversion);

        let conv = draft.conversion.as_ref().unwrap();
        assert_eq!(conv.goal, "signup");
        assert_eq!(conv.value, Some(49.0));
    }

    #[test]
    fn test_default_draft_kind_is_custom() {
        let draft = EventDraft::default();
        assert_eq!(draft.kind(), EventKind::Custom);
    }

    #[test]
    fn test_from_draft() {
        let draft = EventDraft::page_view();
        let event = TelemetryEvent::from_draft(draft, Utc::now());

        assert!(!event.event_id.is_empty());
        assert_eq!(event.event_type, EventKind::PageView);
        assert_eq!(event.event_category.as_deref(), Some("navigation"));
        assert!(event.page.is_none());
        assert!(event.device.is_none());
    }

    #[test]
    fn test_event_ids_unique() {
        let a = TelemetryEvent::from_draft(EventDraft::page_view(), Utc::now());
        let b = TelemetryEvent::from_draft(EventDraft::page_view(), Utc::now());
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_is_conversion() {
        let conv = TelemetryEvent::from_draft(EventDraft::conversion("buy", None), Utc::now());
        assert!(conv.is_conversion());

        let click = TelemetryEvent::from_draft(EventDraft::click("save"), Utc::now());
        assert!(!click.is_conversion());
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let mut event = TelemetryEvent::from_draft(
            EventDraft::click("export_button").with_property("label", "Export"),
            Utc::now(),
        );
        event.session = Some(SessionContext {
            session_id: "sess_1_abc".to_string(),
            is_new_session: true,
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: TelemetryEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_id, parsed.event_id);
        assert_eq!(event.event_type, parsed.event_type);
        assert_eq!(event.properties, parsed.properties);
        assert_eq!(event.session, parsed.session);
    }

    #[test]
    fn test_absent_blocks_omitted_on_wire() {
        let event = TelemetryEvent::from_draft(EventDraft::custom("x"), Utc::now());
        let json = serde_json::to_string(&event).unwrap();

        assert!(!json.contains("\"utm\""));
        assert!(!json.contains("\"device\""));
        assert!(!json.contains("\"performance\""));
        assert!(json.contains("\"eventType\":\"custom\""));
    }

    #[test]
    fn test_utm_context_is_empty() {
        assert!(UtmContext::default().is_empty());

        let utm = UtmContext {
            source: Some("newsletter".to_string()),
            ..Default::default()
        };
        assert!(!utm.is_empty());
    }
}
