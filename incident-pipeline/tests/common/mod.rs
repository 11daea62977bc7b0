// Shared fixtures for the integration tests. Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use incident_pipeline::config::{FetchConfig, ProviderSettings, RecencyPolicy, ScraperConfig};
use incident_pipeline::scraper::{ScrapeError, ScrapeOutput, Scraper};
use incident_pipeline::types::IngestItem;
use serde_json::Map;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// One scripted scraper reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Page { title: Option<String>, content: String },
    ApiError(String),
    Timeout,
    /// Never answers; only a caller-side timeout or cancellation ends the call.
    Hang,
}

impl Scripted {
    pub fn page(title: &str, content: &str) -> Self {
        Scripted::Page {
            title: Some(title.to_string()),
            content: content.to_string(),
        }
    }
}

/// Scraper that replays a script and counts calls. An exhausted script answers with an
/// API error.
#[derive(Default)]
pub struct FakeScraper {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl FakeScraper {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    fn source_name(&self) -> String {
        "fake-scraper".to_string()
    }

    async fn scrape(&self, url: &str) -> Result<ScrapeOutput, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Page { title, content }) => Ok(ScrapeOutput {
                url: url.to_string(),
                content,
                title,
                fetched_at: Some(fixed_time()),
                metadata: Map::new(),
            }),
            Some(Scripted::ApiError(message)) => Err(ScrapeError::Api(message)),
            Some(Scripted::Timeout) => Err(ScrapeError::Timeout),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ScrapeError::Api("woke up".to_string()))
            }
            None => Err(ScrapeError::Api("no scripted response".to_string())),
        }
    }
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Fast retries so tests never sleep for real.
pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_seconds: 5,
        max_retries: 2,
        retry_delay_seconds: 0,
        ..Default::default()
    }
}

pub fn scraper_config() -> ScraperConfig {
    ScraperConfig {
        timeout: Duration::from_millis(500),
        max_attempts: 3,
        backoff_step: Duration::from_millis(10),
        ..Default::default()
    }
}

pub fn recency(max_items: usize) -> RecencyPolicy {
    RecencyPolicy {
        max_items,
        lookback: None,
    }
}

/// Provider settings pointing every external provider at `base_url`, with keys set.
pub fn provider_settings(base_url: &str) -> ProviderSettings {
    let mut settings = ProviderSettings {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    settings.openai.base_url = base_url.to_string();
    settings.openai.api_key = Some("test-openai-key".to_string());
    settings.gemini.base_url = base_url.to_string();
    settings.gemini.api_key = Some("test-gemini-key".to_string());
    settings.huggingface.base_url = base_url.to_string();
    settings.huggingface.api_key = Some("test-hf-key".to_string());
    settings
}

pub fn item(url: &str, title: &str, content: &str) -> IngestItem {
    IngestItem {
        url: url.to_string(),
        title: Some(title.to_string()),
        content: Some(content.to_string()),
        fetched_at: fixed_time(),
        source: "example.com".to_string(),
        metadata: Map::new(),
    }
}

pub const KEV_JSON: &str = r#"{
  "title": "CISA Catalog of Known Exploited Vulnerabilities",
  "catalogVersion": "2024.03.01",
  "count": 3,
  "vulnerabilities": [
    {
      "cveID": "CVE-2024-21412",
      "vendorProject": "Microsoft",
      "product": "Windows",
      "vulnerabilityName": "Microsoft Windows Internet Shortcut Files Security Feature Bypass",
      "dateAdded": "2024-02-13",
      "shortDescription": "Internet Shortcut Files contain an unspecified vulnerability that allows for a security feature bypass.",
      "notes": "https://msrc.microsoft.com/update-guide/vulnerability/CVE-2024-21412"
    },
    {
      "cveID": "CVE-2024-1709",
      "vendorProject": "ConnectWise",
      "product": "ScreenConnect",
      "vulnerabilityName": "ConnectWise ScreenConnect Authentication Bypass",
      "dateAdded": "2024-02-22",
      "shortDescription": "ConnectWise ScreenConnect contains an authentication bypass.",
      "notes": ""
    },
    {
      "cveID": "CVE-2023-29360",
      "vendorProject": "Microsoft",
      "product": "Streaming Service Proxy",
      "vulnerabilityName": "Microsoft Streaming Service Untrusted Pointer Dereference",
      "dateAdded": "2024-02-29",
      "shortDescription": "Microsoft Streaming Service contains an untrusted pointer dereference vulnerability.",
      "notes": ""
    }
  ]
}"#;

pub const MSRC_RSS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Security Update Guide</title>
    <item>
      <title><![CDATA[CVE-2024-21413 Microsoft Outlook Remote Code Execution]]></title>
      <link>https://msrc.microsoft.com/update-guide/vulnerability/CVE-2024-21413</link>
      <description>Outlook &lt;b&gt;preview pane&lt;/b&gt; is an attack vector &amp; needs patching.</description>
      <pubDate>Tue, 13 Feb 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Chromium: CVE-2024-1283 Heap buffer overflow in Skia</title>
      <link>https://msrc.microsoft.com/update-guide/vulnerability/CVE-2024-1283</link>
      <content:encoded><![CDATA[<p>Chromium issue affecting Edge.</p>]]></content:encoded>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

pub const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Vendor advisories</title>
  <id>urn:uuid:60a76c80-d399-11d9-b91C-0003939e0af6</id>
  <updated>2024-02-20T18:30:02Z</updated>
  <entry>
    <title>Advisory VA-2024-007 gateway firmware update</title>
    <link href="https://vendor.example/advisories/VA-2024-007"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-02-20T18:30:02Z</updated>
    <summary>Firmware 4.2.1 fixes CVE-2024-3400 in the management interface.</summary>
  </entry>
</feed>"#;
