use crate::config::PipelineConfig;
use crate::fetcher::FeedFetcher;
use crate::ingest::IngestionCoordinator;
use crate::providers::Providers;
use crate::scraper::{FirecrawlScraper, Scraper};
use crate::summary::SummaryOrchestrator;
use crate::types::{IngestionReport, Result, SummaryBatchReport, SummaryRun};
use interfaces::{AdvisoryStore, ProviderKind};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Wires fetching, ingestion and summarization over one store.
pub struct IncidentPipeline<S: AdvisoryStore + ?Sized> {
    config: PipelineConfig,
    fetcher: FeedFetcher,
    coordinator: IngestionCoordinator<S>,
    summaries: SummaryOrchestrator<S>,
}

impl<S: AdvisoryStore + ?Sized> IncidentPipeline<S> {
    pub fn new(config: PipelineConfig, store: Arc<S>, scraper: Arc<dyn Scraper>) -> Result<Self> {
        let fetcher = FeedFetcher::new(
            config.fetch.clone(),
            config.recency.clone(),
            scraper,
            config.scraper.clone(),
        )?;
        let providers = Providers::new(config.providers.clone())?;

        Ok(Self {
            fetcher,
            coordinator: IngestionCoordinator::new(store.clone()),
            summaries: SummaryOrchestrator::new(store, providers, config.fallback),
            config,
        })
    }

    /// Pipeline backed by the Firecrawl-compatible scraper from `config.scraper`.
    pub fn with_firecrawl(config: PipelineConfig, store: Arc<S>) -> Result<Self> {
        let scraper: Arc<dyn Scraper> = Arc::new(FirecrawlScraper::new(&config.scraper)?);
        Self::new(config, store, scraper)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    pub fn summaries(&self) -> &SummaryOrchestrator<S> {
        &self.summaries
    }

    /// Fetch the given seeds (the configured defaults when empty) and ingest the result.
    pub async fn run_ingestion(&self, seeds: &[String]) -> Result<IngestionReport> {
        let seeds = if seeds.is_empty() { &self.config.seeds[..] } else { seeds };
        let items = self.fetcher.fetch_seeds(seeds).await?;
        let report = self.coordinator.ingest(&items).await;

        info!(
            "Ingestion finished: {} items, {} skipped, {} incidents changed",
            report.items_seen,
            report.items_skipped,
            report.changed_incident_ids.len()
        );
        Ok(report)
    }

    /// Summarize the most recently updated incidents. `limit` defaults to the configured
    /// batch size.
    pub async fn run_summary_batch(
        &self,
        limit: Option<usize>,
        provider: Option<ProviderKind>,
    ) -> Result<SummaryBatchReport> {
        let limit = limit.unwrap_or(self.config.summary_batch_limit);
        self.summaries.run_batch(limit, provider).await
    }

    pub async fn summarize_incident_now(
        &self,
        incident_id: Uuid,
        provider: Option<ProviderKind>,
        triggered_by: &str,
    ) -> Result<SummaryRun> {
        self.summaries
            .summarize_incident_now(incident_id, provider, triggered_by)
            .await
    }

    pub async fn delete_summary_run(&self, summary_id: Uuid) -> Result<Option<SummaryRun>> {
        self.summaries.delete_summary_run(summary_id).await
    }

    pub async fn list_summary_runs(&self, incident_id: Uuid) -> Result<Vec<SummaryRun>> {
        self.summaries.list_summary_runs(incident_id).await
    }

    pub async fn default_provider(&self) -> ProviderKind {
        self.summaries.default_provider().await
    }

    pub async fn set_default_provider(&self, provider: ProviderKind) -> Result<()> {
        self.summaries.set_default_provider(provider).await
    }
}
