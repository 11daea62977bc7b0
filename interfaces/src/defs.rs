use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One record pulled from a feed or a scrape, before it is fingerprinted.
/// It has no identity beyond its position in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestItem {
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub metadata: Map<String, Value>,
}

impl IngestItem {
    /// The text the fingerprint and CVE scan run over: title, a newline, then the body.
    pub fn fingerprint_text(&self) -> String {
        format!(
            "{}\n{}",
            self.title.as_deref().unwrap_or(""),
            self.content.as_deref().unwrap_or("")
        )
    }
}

/// Persisted copy of one ingested document. `content_hash` is unique across the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: Uuid,
    pub url: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
}

impl RawDocument {
    /// Body if present, else title, trimmed. Empty when the document carries no usable text.
    pub fn source_text(&self) -> String {
        let body = self.body_text.as_deref().map(str::trim).unwrap_or("");
        if !body.is_empty() {
            return body.to_string();
        }
        self.title.as_deref().map(str::trim).unwrap_or("").to_string()
    }
}

/// Clustering aggregate. Exactly one per canonical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub canonical_key: String,
    pub title: String,
    pub kev: bool,
    pub cvss_base: Option<f64>,
    pub last_summarized_at: Option<DateTime<Utc>>,
    pub last_summary_provider: Option<ProviderKind>,
    pub last_summary_model: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Link row between an incident and one of its raw documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentSource {
    pub incident_id: Uuid,
    pub raw_id: Uuid,
}

/// One immutable summarization attempt for an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRun {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub tl_dr: String,
    pub summary_md: String,
    pub citations: Vec<String>,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub fallback_from: Option<ProviderKind>,
    pub ran_at: DateTime<Utc>,
    pub triggered_by: Option<String>,
}

/// The incident's cached view of its most recent summary run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryProjection {
    pub last_summarized_at: Option<DateTime<Utc>>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
}

impl SummaryProjection {
    /// Projection for the given latest run, or all nulls when there is none.
    pub fn from_latest(run: Option<&SummaryRun>) -> Self {
        match run {
            Some(run) => Self {
                last_summarized_at: Some(run.ran_at),
                provider: Some(run.provider),
                model: run.model.clone(),
            },
            None => Self::default(),
        }
    }
}

/// Summarization backends. Serialized with the same tags the settings row uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "rule_based")]
    RuleBased,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "gemini")]
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::RuleBased,
        ProviderKind::HuggingFace,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::RuleBased => "rule_based",
            ProviderKind::OpenAi => "openai",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Human-readable name for admin surfaces.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::RuleBased => "Rule-based (default)",
            ProviderKind::OpenAi => "OpenAI API",
            ProviderKind::HuggingFace => "Hugging Face (free tier)",
            ProviderKind::Gemini => "Gemini",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::RuleBased
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown summarizer provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rule_based" => Ok(ProviderKind::RuleBased),
            "openai" => Ok(ProviderKind::OpenAi),
            "huggingface" => Ok(ProviderKind::HuggingFace),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}
