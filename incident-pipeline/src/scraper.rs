//! Generic scraping service used when a seed has no structured feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::config::ScraperConfig;
use crate::types::{IngestItem, PipelineError, Result};

/// Normalised output of one scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutput {
    pub url: String,
    /// Markdown when available, else HTML, else the pretty-printed raw payload.
    pub content: String,
    pub title: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

impl ScrapeOutput {
    pub fn into_item(self, source: &str) -> IngestItem {
        IngestItem {
            url: self.url,
            title: self.title,
            content: Some(self.content).filter(|c| !c.trim().is_empty()),
            fetched_at: self.fetched_at.unwrap_or_else(Utc::now),
            source: source.to_string(),
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("scrape timed out")]
    Timeout,

    #[error("scrape cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scraping API error: {0}")]
    Api(String),

    #[error("malformed scrape response: {0}")]
    Malformed(String),
}

impl ScrapeError {
    /// Timeouts and cancellations end a retry loop immediately.
    pub fn is_terminal(&self) -> bool {
        match self {
            ScrapeError::Timeout | ScrapeError::Cancelled => true,
            ScrapeError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Label stored as the `source` of scraped items.
    fn source_name(&self) -> String;

    /// One scrape call. Never retries internally.
    async fn scrape(&self, url: &str) -> std::result::Result<ScrapeOutput, ScrapeError>;
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: Vec<&'static str>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
    #[serde(rename = "removeBase64Images")]
    remove_base64_images: bool,
}

/// Client for a Firecrawl-compatible `/v1/scrape` endpoint.
pub struct FirecrawlScraper {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FirecrawlScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(PipelineError::ConfigMissing("FIRECRAWL_API_URL".to_string()));
        }
        Url::parse(base_url)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Scraper for FirecrawlScraper {
    fn source_name(&self) -> String {
        "firecrawl".to_string()
    }

    async fn scrape(&self, url: &str) -> std::result::Result<ScrapeOutput, ScrapeError> {
        debug!("Scraping {}", url);

        let request = ScrapeRequest {
            url,
            formats: vec!["markdown"],
            only_main_content: true,
            remove_base64_images: true,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout
            } else {
                ScrapeError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Api(format!("{} - {}", status, text)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ScrapeError::Malformed(e.to_string()))?;

        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("scrape reported failure");
            return Err(ScrapeError::Api(message.to_string()));
        }

        Ok(normalise_scrape_payload(url, &payload))
    }
}

/// Pull content, title, timestamp and metadata out of a scrape response, looking at the
/// top level and under `data`.
pub fn normalise_scrape_payload(url: &str, payload: &Value) -> ScrapeOutput {
    let empty = Map::new();
    let outer = payload.as_object().unwrap_or(&empty);
    let inner = outer.get("data").and_then(Value::as_object).unwrap_or(&empty);
    let layers = [outer, inner];

    let string_at = |key: &str| -> Option<String> {
        layers
            .iter()
            .filter_map(|layer| layer.get(key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };
    let metadata = layers
        .iter()
        .find_map(|layer| layer.get("metadata").and_then(Value::as_object))
        .cloned();

    let title = string_at("title")
        .or_else(|| string_at("pageTitle"))
        .or_else(|| {
            layers.iter().find_map(|layer| {
                layer
                    .get("metadata")
                    .and_then(|m| m.get("title"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        });

    let fetched_at = string_at("fetchedAt")
        .or_else(|| string_at("fetched_at"))
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let content = string_at("markdown")
        .or_else(|| string_at("html"))
        .unwrap_or_else(|| serde_json::to_string_pretty(payload).unwrap_or_default());

    ScrapeOutput {
        url: url.to_string(),
        content,
        title,
        fetched_at,
        metadata: metadata.unwrap_or_default(),
    }
}
