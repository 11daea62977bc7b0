pub mod config;
pub mod fetcher;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod providers;
pub mod recency;
pub mod scraper;
pub mod store;
pub mod summary;
pub mod types;

pub use config::{FallbackPolicy, FetchConfig, PipelineConfig, ProviderSettings, RecencyPolicy, ScraperConfig};
pub use fetcher::FeedFetcher;
pub use ingest::IngestionCoordinator;
pub use interfaces::{AdvisoryStore, ProviderKind};
pub use parser::FeedParser;
pub use pipeline::IncidentPipeline;
pub use providers::Providers;
pub use scraper::{FirecrawlScraper, Scraper};
pub use store::{MemoryStore, PgStore};
pub use summary::SummaryOrchestrator;
pub use types::*;
