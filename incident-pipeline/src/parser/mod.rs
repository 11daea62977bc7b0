//! Format sniffing and normalisation of structured advisory feeds.

pub mod csv;
pub mod json;
pub mod rss;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RecencyPolicy;
use crate::recency::RecencyFilter;
use crate::types::{IngestItem, PipelineError, Result};

// Candidate field names per logical field, tried in order. The CSV parser matches
// them case- and spacing-insensitively.
pub(crate) const TITLE_FIELDS: &[&str] = &["title", "vulnerabilityName", "name", "headline", "subject"];
pub(crate) const CVE_FIELDS: &[&str] = &["cveID", "cveId", "cve_id", "cve", "id"];
pub(crate) const DESCRIPTION_FIELDS: &[&str] = &[
    "shortDescription",
    "description",
    "descriptions",
    "summary",
    "details",
    "content",
];
pub(crate) const DATE_FIELDS: &[&str] = &[
    "dateAdded",
    "published",
    "datePublished",
    "pubDate",
    "date",
    "updated",
    "lastModified",
];
pub(crate) const VENDOR_FIELDS: &[&str] = &["vendorProject", "vendor", "vendor_project"];
pub(crate) const PRODUCT_FIELDS: &[&str] = &["product", "affectedProduct"];
pub(crate) const REFERENCE_FIELDS: &[&str] = &["references", "notes", "reference"];
pub(crate) const LINK_FIELDS: &[&str] = &["url", "link", "href"];

/// Shape of a fetched payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Json,
    Csv,
    Rss,
    None,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Json => "json",
            FeedFormat::Csv => "csv",
            FeedFormat::Rss => "rss",
            FeedFormat::None => "none",
        }
    }

    pub fn is_structured(&self) -> bool {
        !matches!(self, FeedFormat::None)
    }
}

/// Guess from the seed URL alone.
pub fn format_hint(url: &str) -> FeedFormat {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());

    if path.ends_with(".json") || path.contains("/feeds/") {
        FeedFormat::Json
    } else if path.ends_with(".csv") {
        FeedFormat::Csv
    } else if path.ends_with(".rss") || path.ends_with(".xml") || path.contains("/rss") {
        FeedFormat::Rss
    } else {
        FeedFormat::None
    }
}

/// Decide the payload format. Content shape wins, then the content-type header, then
/// the URL hint when the payload is ambiguous.
pub fn detect_format(url: &str, content_type: Option<&str>, body: &str) -> FeedFormat {
    let hint = format_hint(url);
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    let head: String = trimmed.chars().take(256).collect::<String>().to_lowercase();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return FeedFormat::Json;
    }
    // XHTML pages carry an XML declaration too; look at the root that follows it.
    let root = match head.strip_prefix("<?xml") {
        Some(rest) => rest.split_once("?>").map(|(_, r)| r.trim_start()).unwrap_or(""),
        None => head.as_str(),
    };
    if root.starts_with("<!doctype html") || root.starts_with("<html") {
        return FeedFormat::None;
    }
    if head.starts_with("<?xml") || head.starts_with("<rss") || head.starts_with("<feed") || head.starts_with("<rdf") {
        return FeedFormat::Rss;
    }

    if let Some(content_type) = content_type.map(|ct| ct.to_lowercase()) {
        if content_type.contains("json") {
            return FeedFormat::Json;
        }
        if content_type.contains("csv") {
            return FeedFormat::Csv;
        }
        if content_type.contains("rss") || content_type.contains("atom") || content_type.contains("xml") {
            return FeedFormat::Rss;
        }
        if content_type.contains("html") {
            return FeedFormat::None;
        }
    }

    if looks_like_csv(trimmed) {
        return FeedFormat::Csv;
    }

    hint
}

fn looks_like_csv(body: &str) -> bool {
    if body.starts_with('<') {
        return false;
    }
    match body.split_once('\n') {
        Some((first, rest)) => first.contains(',') && !rest.trim().is_empty(),
        None => false,
    }
}

/// One record pulled out of a feed, before the recency policy runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedRecord {
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub date: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Logical fields shared by the JSON and CSV parsers.
#[derive(Debug, Default)]
pub(crate) struct RecordFields {
    pub title: Option<String>,
    pub cve: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub references: Option<String>,
    pub link: Option<String>,
}

impl RecordFields {
    pub fn has_descriptive_fields(&self) -> bool {
        self.description.is_some()
            || self.vendor.is_some()
            || self.product.is_some()
            || self.references.is_some()
    }

    /// Body text built from the descriptive fields, `None` when there are none.
    pub fn compose_body(&self) -> Option<String> {
        if !self.has_descriptive_fields() {
            return None;
        }
        let mut lines = Vec::new();
        if let Some(description) = &self.description {
            lines.push(description.clone());
        }
        if let Some(cve) = &self.cve {
            lines.push(format!("CVE: {}", cve));
        }
        if let Some(vendor) = &self.vendor {
            lines.push(format!("Vendor: {}", vendor));
        }
        if let Some(product) = &self.product {
            lines.push(format!("Product: {}", product));
        }
        if let Some(references) = &self.references {
            lines.push(format!("References: {}", references));
        }
        Some(lines.join("\n"))
    }

    pub fn into_record(self, fallback_body: impl FnOnce() -> String) -> ParsedRecord {
        let body = self.compose_body().unwrap_or_else(fallback_body);
        let mut metadata = Map::new();
        for (key, value) in [
            ("cve", &self.cve),
            ("vendor", &self.vendor),
            ("product", &self.product),
            ("published", &self.date),
        ] {
            if let Some(value) = value {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        ParsedRecord {
            url: self.link,
            title: self.title.or(self.cve),
            body: Some(body),
            date: self.date,
            metadata,
        }
    }
}

/// Turns fetched payloads into [`IngestItem`]s under one recency policy.
pub struct FeedParser {
    policy: RecencyPolicy,
}

impl FeedParser {
    pub fn new(policy: RecencyPolicy) -> Self {
        Self { policy }
    }

    /// Parse `body` as `format`. Malformed payloads yield `ParseFailed`; callers log and
    /// move on to the next seed.
    pub fn parse(
        &self,
        format: FeedFormat,
        seed_url: &str,
        body: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<IngestItem>> {
        debug!("Parsing {} payload from {} ({} bytes)", format.as_str(), seed_url, body.len());

        let parse_failed = |message: String| PipelineError::ParseFailed {
            url: seed_url.to_string(),
            format: format.as_str(),
            message,
        };

        let records = match format {
            FeedFormat::Json => json::parse_records(body).map_err(parse_failed)?,
            FeedFormat::Csv => csv::parse_records(body).map_err(parse_failed)?,
            FeedFormat::Rss => rss::parse_records(body).map_err(parse_failed)?,
            FeedFormat::None => return Ok(Vec::new()),
        };

        let total = records.len();
        let source = source_label(seed_url);
        let mut filter = RecencyFilter::new(&self.policy, fetched_at);
        let mut items = Vec::new();

        for record in records {
            if filter.is_full() {
                break;
            }
            if !filter.admit(record.date.as_deref()) {
                continue;
            }
            items.push(record.into_item(seed_url, &source, format, fetched_at));
        }

        if filter.kept() < total {
            info!("Kept {}/{} records from {}", filter.kept(), total, seed_url);
        }
        if items.is_empty() && total > 0 {
            warn!("Recency policy dropped every record from {}", seed_url);
        }

        Ok(items)
    }
}

impl ParsedRecord {
    fn into_item(mut self, seed_url: &str, source: &str, format: FeedFormat, fetched_at: DateTime<Utc>) -> IngestItem {
        self.metadata.insert("format".to_string(), Value::String(format.as_str().to_string()));
        self.metadata.insert("feed_url".to_string(), Value::String(seed_url.to_string()));
        if let Some(date) = &self.date {
            self.metadata
                .entry("published".to_string())
                .or_insert_with(|| Value::String(date.clone()));
        }

        IngestItem {
            url: self.url.unwrap_or_else(|| seed_url.to_string()),
            title: self.title,
            content: self.body,
            fetched_at,
            source: source.to_string(),
            metadata: self.metadata,
        }
    }
}

/// Source label for items from a seed: its host, or `web`.
pub fn source_label(seed_url: &str) -> String {
    Url::parse(seed_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "web".to_string())
}

/// First non-empty trimmed string among `values`.
pub(crate) fn first_non_empty<I, S>(values: I) -> Option<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .flatten()
        .map(|s| s.as_ref().trim().to_string())
        .find(|s| !s.is_empty())
}
