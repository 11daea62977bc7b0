use std::env;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::warn;

/// Feeds crawled when no seeds are given explicitly.
pub const DEFAULT_SEEDS: [&str; 4] = [
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json",
    "https://msrc.microsoft.com/update-guide/rss",
    "https://www.cisa.gov/known-exploited-vulnerabilities-catalog",
    "https://nvd.nist.gov/vuln/recent",
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    /// Seeds fetched at once. Output order is preserved regardless.
    pub seed_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Incident-Pipeline/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
            seed_concurrency: 1,
        }
    }
}

/// Per-feed volume and age bounds shared by every parser.
#[derive(Debug, Clone)]
pub struct RecencyPolicy {
    pub max_items: usize,
    pub lookback: Option<ChronoDuration>,
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self {
            max_items: 50,
            lookback: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Attempts for the standalone scrape path. Batch ingestion always makes one call.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff_step * n`.
    pub backoff_step: Duration,
}

impl ScraperConfig {
    /// `retries` counts calls after the first.
    pub fn set_retries(&mut self, retries: u32) {
        self.max_attempts = retries.saturating_add(1);
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.firecrawl.dev".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai: ApiSettings,
    pub huggingface: ApiSettings,
    pub gemini: ApiSettings,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai: ApiSettings {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
            },
            huggingface: ApiSettings {
                api_key: None,
                model: "facebook/bart-large-cnn".to_string(),
                base_url: "https://api-inference.huggingface.co".to_string(),
            },
            gemini: ApiSettings {
                api_key: None,
                model: "gemini-1.5-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
            },
            timeout: Duration::from_secs(60),
        }
    }
}

/// What happens when the selected provider fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Surface the failure; nothing is written.
    #[default]
    Disabled,
    /// Re-run with `rule_based` and record the failed provider in `fallback_from`.
    RuleBased,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub seeds: Vec<String>,
    pub fetch: FetchConfig,
    pub recency: RecencyPolicy,
    pub scraper: ScraperConfig,
    pub providers: ProviderSettings,
    pub fallback: FallbackPolicy,
    pub summary_batch_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seeds: DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect(),
            fetch: FetchConfig::default(),
            recency: RecencyPolicy::default(),
            scraper: ScraperConfig::default(),
            providers: ProviderSettings::default(),
            fallback: FallbackPolicy::default(),
            summary_batch_limit: 10,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with whatever the environment provides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(max_items) = env_parse::<usize>("FEED_MAX_ITEMS") {
            config.recency.max_items = max_items;
        }
        if let Some(days) = env_parse::<i64>("FEED_LOOKBACK_DAYS") {
            config.recency.lookback = (days > 0).then(|| ChronoDuration::days(days));
        }
        if let Some(concurrency) = env_parse::<usize>("FEED_SEED_CONCURRENCY") {
            config.fetch.seed_concurrency = concurrency.max(1);
        }

        config.scraper.api_key = env_string("FIRECRAWL_API_KEY");
        if let Some(base_url) = env_string("FIRECRAWL_API_URL") {
            config.scraper.base_url = base_url;
        }
        if let Some(ms) = env_parse::<u64>("FIRECRAWL_TIMEOUT_MS") {
            config.scraper.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = env_parse::<u32>("FIRECRAWL_RETRIES") {
            config.scraper.set_retries(retries);
        }

        let providers = &mut config.providers;
        providers.openai.api_key = env_string("OPENAI_API_KEY");
        providers.huggingface.api_key =
            env_string("HUGGINGFACE_API_KEY").or_else(|| env_string("HF_API_TOKEN"));
        providers.gemini.api_key = env_string("GEMINI_API_KEY");
        if let Some(model) = env_string("OPENAI_MODEL") {
            providers.openai.model = model;
        }
        if let Some(model) = env_string("HUGGINGFACE_MODEL") {
            providers.huggingface.model = model;
        }
        if let Some(model) = env_string("GEMINI_MODEL") {
            providers.gemini.model = model;
        }

        if let Some(policy) = env_string("SUMMARY_FALLBACK") {
            config.fallback = match policy.as_str() {
                "rule_based" => FallbackPolicy::RuleBased,
                "none" | "disabled" => FallbackPolicy::Disabled,
                other => {
                    warn!("Ignoring unknown SUMMARY_FALLBACK value: {}", other);
                    FallbackPolicy::Disabled
                }
            };
        }
        if let Some(limit) = env_parse::<usize>("SUMMARY_BATCH_LIMIT") {
            config.summary_batch_limit = limit;
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_are_on_top_of_the_first_attempt() {
        let mut scraper = ScraperConfig::default();
        scraper.set_retries(0);
        assert_eq!(scraper.max_attempts, 1);
        scraper.set_retries(2);
        assert_eq!(scraper.max_attempts, 3);
        scraper.set_retries(u32::MAX);
        assert_eq!(scraper.max_attempts, u32::MAX);
    }
}
