use crate::config::{FetchConfig, RecencyPolicy, ScraperConfig};
use crate::parser::{detect_format, FeedParser};
use crate::scraper::{ScrapeError, Scraper};
use crate::types::{IngestItem, PipelineError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Body and headers of one successful direct fetch.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// Retrieves seeds, parsing structured feeds directly and falling back to the
/// scraping service for everything else.
pub struct FeedFetcher {
    client: Client,
    config: FetchConfig,
    parser: FeedParser,
    scraper: Arc<dyn Scraper>,
    scraper_config: ScraperConfig,
}

impl FeedFetcher {
    pub fn new(
        config: FetchConfig,
        recency: RecencyPolicy,
        scraper: Arc<dyn Scraper>,
        scraper_config: ScraperConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            parser: FeedParser::new(recency),
            scraper,
            scraper_config,
        })
    }

    /// Fetch every seed and concatenate their items in seed order.
    ///
    /// A failing seed is logged and skipped. The batch fails only when every seed
    /// failed, in which case nothing was collected.
    pub async fn fetch_seeds(&self, seeds: &[String]) -> Result<Vec<IngestItem>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        info!("Fetching {} seeds", seeds.len());

        let outcomes: Vec<(&String, Result<Vec<IngestItem>>)> = stream::iter(seeds)
            .map(|seed| async move { (seed, self.fetch_seed(seed).await) })
            .buffered(self.config.seed_concurrency.max(1))
            .collect()
            .await;

        let mut items = Vec::new();
        let mut failed = 0;
        for (seed, outcome) in outcomes {
            match outcome {
                Ok(seed_items) => {
                    info!("Seed {} produced {} items", seed, seed_items.len());
                    items.extend(seed_items);
                }
                Err(e) => {
                    error!("Seed {} failed: {}", seed, e);
                    failed += 1;
                }
            }
        }

        if failed == seeds.len() && items.is_empty() {
            return Err(PipelineError::NoSourcesSucceeded { attempted: seeds.len() });
        }

        info!("Collected {} items ({}/{} seeds failed)", items.len(), failed, seeds.len());
        Ok(items)
    }

    /// Structured path first; the scraper gets one call when the seed has no
    /// recognisable feed or could not be fetched directly.
    pub async fn fetch_seed(&self, seed: &str) -> Result<Vec<IngestItem>> {
        match self.fetch_payload(seed).await {
            Ok(payload) => {
                debug!(
                    "Fetched {} (HTTP {}, {} bytes in {}ms)",
                    payload.url,
                    payload.status,
                    payload.body.len(),
                    payload.response_time_ms
                );
                let format = detect_format(seed, payload.content_type.as_deref(), &payload.body);
                if format.is_structured() {
                    debug!("Detected {} feed at {}", format.as_str(), seed);
                    return self
                        .parser
                        .parse(format, seed, &payload.body, payload.fetched_at)
                        .map_err(|e| {
                            warn!("Skipping seed {}: {}", seed, e);
                            e
                        });
                }
                debug!("No structured feed at {}, using scraper", seed);
            }
            Err(e) => {
                warn!("Direct fetch failed for {}: {}; using scraper", seed, e);
            }
        }

        let output = tokio::time::timeout(self.scraper_config.timeout, self.scraper.scrape(seed))
            .await
            .unwrap_or_else(|_| Err(ScrapeError::Timeout))
            .map_err(|e| PipelineError::FetchFailed {
                url: seed.to_string(),
                message: e.to_string(),
            })?;

        Ok(vec![output.into_item(&self.scraper.source_name())])
    }

    /// GET with exponential backoff between attempts.
    pub async fn fetch_payload(&self, url: &str) -> Result<FetchedPayload> {
        let start_time = Instant::now();
        let fetch_time = Utc::now();

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            // Attempts are bounded by max_retries.
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let retryable = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        if let Some(content_length) = response.content_length() {
                            let size_mb = content_length as usize / (1024 * 1024);
                            if size_mb > self.config.max_feed_size_mb {
                                return Err(PipelineError::FetchFailed {
                                    url: url.to_string(),
                                    message: format!("Feed too large: {}MB", size_mb),
                                });
                            }
                        }

                        let content_type = response
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());

                        match response.text().await {
                            Ok(body) => {
                                debug!("Fetched {} ({} bytes)", url, body.len());
                                return Ok(FetchedPayload {
                                    url: url.to_string(),
                                    status: status.as_u16(),
                                    content_type,
                                    body,
                                    fetched_at: fetch_time,
                                    response_time_ms: start_time.elapsed().as_millis() as u64,
                                });
                            }
                            Err(e) => {
                                last_error = Some(e.to_string());
                                true
                            }
                        }
                    } else {
                        last_error = Some(format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("Unknown")
                        ));
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    }
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    true
                }
            };

            if !retryable || attempt >= self.config.max_retries {
                break;
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        Err(PipelineError::FetchFailed {
            url: url.to_string(),
            message: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// Scrape one URL outside a batch with linear backoff: the delay before attempt
    /// `n + 1` is `backoff_step * n`. Timeouts and cancellation stop immediately.
    pub async fn scrape_with_retry(&self, url: &str, cancel: &CancellationToken) -> Result<IngestItem> {
        let attempts = self.scraper_config.max_attempts.max(1);
        let fetch_failed = |message: String| PipelineError::FetchFailed {
            url: url.to_string(),
            message,
        };
        let mut last_error: Option<ScrapeError> = None;

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
                result = tokio::time::timeout(self.scraper_config.timeout, self.scraper.scrape(url)) => {
                    result.unwrap_or_else(|_| Err(ScrapeError::Timeout))
                }
            };

            match outcome {
                Ok(output) => return Ok(output.into_item(&self.scraper.source_name())),
                Err(e) if e.is_terminal() => {
                    warn!("Scrape of {} aborted on attempt {}: {}", url, attempt, e);
                    return Err(fetch_failed(e.to_string()));
                }
                Err(e) => {
                    warn!("Scrape attempt {}/{} failed for {}: {}", attempt, attempts, url, e);
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                let delay = self.scraper_config.backoff_step * attempt;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(fetch_failed(ScrapeError::Cancelled.to_string())),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(fetch_failed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "scrape failed".to_string()),
        ))
    }
}
