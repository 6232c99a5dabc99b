//! Thin request/response façade for historical queries and bulk export.
//!
//! Boundary-only by design: these builders assemble query strings for
//! the collector's export and query endpoints and hand back the raw
//! payload. No retry or batching logic lives here.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{TelemetryError, TelemetryResult};

/// Output format of a bulk export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Value used in the query string and as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Filtered, paginated query over historical audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    filters: BTreeMap<String, String>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page number (1-based).
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Set the page size.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Add a filter key/value pair (actor, action, resource type, ...).
    pub fn filter(mut self, key: &str, value: &str) -> Self {
        self.filters.insert(key.to_string(), value.to_string());
        self
    }

    /// Restrict to entries at or after the given instant.
    pub fn since(self, at: DateTime<Utc>) -> Self {
        self.filter("from", &at.to_rfc3339())
    }

    /// Restrict to entries before the given instant.
    pub fn until(self, at: DateTime<Utc>) -> Self {
        self.filter("to", &at.to_rfc3339())
    }

    /// Render as percent-encoded query pairs.
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(size) = self.page_size {
            pairs.push(("pageSize".to_string(), size.to_string()));
        }
        for (k, v) in &self.filters {
            pairs.push((k.clone(), v.clone()));
        }
        encode_pairs(&pairs)
    }
}

/// A bulk export request.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    format: ExportFormat,
    max_records: u32,
    filters: AuditQuery,
    filename: Option<String>,
}

impl ExportRequest {
    /// Create a request for the given format, capped at `max_records`.
    pub fn new(format: ExportFormat, max_records: u32) -> Self {
        Self {
            format,
            max_records,
            filters: AuditQuery::new(),
            filename: None,
        }
    }

    /// Apply query filters to the export.
    pub fn with_filters(mut self, filters: AuditQuery) -> Self {
        self.filters = filters;
        self
    }

    /// Use a caller-supplied download filename.
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    /// Render as percent-encoded query pairs.
    pub fn to_query_string(&self) -> String {
        let mut query = encode_pairs(&[
            ("format".to_string(), self.format.as_str().to_string()),
            ("maxRecords".to_string(), self.max_records.to_string()),
        ]);
        let filters = self.filters.to_query_string();
        if !filters.is_empty() {
            query.push('&');
            query.push_str(&filters);
        }
        query
    }

    /// The download filename: caller-supplied, or generated as
    /// `audit-export-<yyyymmdd>.<ext>`.
    pub fn filename(&self, today: DateTime<Utc>) -> String {
        match &self.filename {
            Some(name) => name.clone(),
            None => format!(
                "audit-export-{}.{}",
                today.format("%Y%m%d"),
                self.format.as_str()
            ),
        }
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// The export payload plus the name to save it under.
#[derive(Debug, Clone)]
pub struct ExportDownload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Fetches exports from the collector.
pub struct ExportClient {
    base_url: String,
    client: reqwest::Client,
}

impl ExportClient {
    /// Create a client against the given collector base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a bulk export as a binary blob.
    pub async fn fetch(&self, request: &ExportRequest) -> TelemetryResult<ExportDownload> {
        let url = format!("{}/export?{}", self.base_url, request.to_query_string());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Rejected(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        Ok(ExportDownload {
            filename: request.filename(Utc::now()),
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_export_format_str() {
        assert_eq!(ExportFormat::Json.as_str(), "json");
        assert_eq!(ExportFormat::Csv.as_str(), "csv");
    }

    #[test]
    fn test_audit_query_string() {
        let query = AuditQuery::new()
            .page(2)
            .page_size(50)
            .filter("actor", "u1")
            .filter("action", "report.delete");

        assert_eq!(
            query.to_query_string(),
            "page=2&pageSize=50&action=report.delete&actor=u1"
        );
    }

    #[test]
    fn test_audit_query_empty() {
        assert_eq!(AuditQuery::new().to_query_string(), "");
    }

    #[test]
    fn test_query_values_percent_encoded() {
        let query = AuditQuery::new().filter("resource", "billing account");
        assert_eq!(query.to_query_string(), "resource=billing%20account");
    }

    #[test]
    fn test_query_time_range() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let query = AuditQuery::new().since(at);
        assert!(query.to_query_string().starts_with("from=2026-08-01T00"));
    }

    #[test]
    fn test_export_request_query_string() {
        let request = ExportRequest::new(ExportFormat::Csv, 5_000)
            .with_filters(AuditQuery::new().filter("action", "login"));
        assert_eq!(
            request.to_query_string(),
            "format=csv&maxRecords=5000&action=login"
        );
    }

    #[test]
    fn test_export_request_without_filters() {
        let request = ExportRequest::new(ExportFormat::Json, 100);
        assert_eq!(request.to_query_string(), "format=json&maxRecords=100");
    }

    #[test]
    fn test_generated_filename() {
        let today = Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap();
        let request = ExportRequest::new(ExportFormat::Csv, 100);
        assert_eq!(request.filename(today), "audit-export-20260827.csv");
    }

    #[test]
    fn test_caller_supplied_filename_wins() {
        let today = Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap();
        let request = ExportRequest::new(ExportFormat::Json, 100).with_filename("mine.json");
        assert_eq!(request.filename(today), "mine.json");
    }
}
