use interfaces::ProviderKind;
use uuid::Uuid;

pub use interfaces::defs::{
    IngestItem, Incident, IncidentSource, RawDocument, SummaryProjection, SummaryRun,
};

use crate::providers::ProviderError;

/// Structured output of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResult {
    pub tl_dr: String,
    pub summary_md: String,
    pub citations: Vec<String>,
    pub provider: ProviderKind,
    pub model: Option<String>,
}

/// Incidents actually mutated by an ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionReport {
    pub items_seen: usize,
    pub items_skipped: usize,
    pub changed_incident_ids: Vec<Uuid>,
}

/// Incidents that received a new summary run in a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryBatchReport {
    pub provider: ProviderKind,
    pub changed_incident_ids: Vec<Uuid>,
    pub failed_incident_ids: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Failed to parse {format} payload from {url}: {message}")]
    ParseFailed {
        url: String,
        format: &'static str,
        message: String,
    },

    #[error("No sources succeeded ({attempted} seeds attempted)")]
    NoSourcesSucceeded { attempted: usize },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("No source material found for this incident. Try running the crawl pipeline first.")]
    NoSourceMaterial { incident_id: Uuid },

    #[error("Source document is empty. Re-run the crawl pipeline or verify the raw item contents.")]
    EmptySource { incident_id: Uuid, raw_id: Uuid },

    #[error("{provider} summarizer failed: {source}")]
    ProviderFailed {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
