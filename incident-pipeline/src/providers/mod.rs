//! Summarization providers, dispatched by [`ProviderKind`].

pub mod gemini;
pub mod huggingface;
pub mod openai;
pub mod rule_based;

use interfaces::ProviderKind;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::types::{PipelineError, Result, SummaryResult};

/// Longest `tl_dr` any provider may return.
pub const TLDR_MAX_CHARS: usize = 140;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    MissingKey(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("returned empty output")]
    Empty,
}

/// Text handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryInput {
    pub title: Option<String>,
    pub body: String,
}

impl SummaryInput {
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// The configured provider set. Each external provider carries its own key, model and
/// endpoint; `rule_based` needs nothing.
pub struct Providers {
    client: Client,
    settings: ProviderSettings,
}

impl Providers {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(PipelineError::Http)?;
        Ok(Self { client, settings })
    }

    /// Run one provider. Failures come back wrapped with the provider's name; there is
    /// no fallback at this level.
    pub async fn summarize(&self, kind: ProviderKind, input: &SummaryInput) -> Result<SummaryResult> {
        debug!("Summarizing with {} ({} chars)", kind, input.body.len());

        let outcome = match kind {
            ProviderKind::RuleBased => Ok(rule_based::summarize(input)),
            ProviderKind::OpenAi => openai::summarize(&self.client, &self.settings.openai, input).await,
            ProviderKind::HuggingFace => {
                huggingface::summarize(&self.client, &self.settings.huggingface, input).await
            }
            ProviderKind::Gemini => gemini::summarize(&self.client, &self.settings.gemini, input).await,
        };

        let mut result = outcome
            .and_then(|result| {
                if kind != ProviderKind::RuleBased && result.summary_md.trim().is_empty() {
                    Err(ProviderError::Empty)
                } else {
                    Ok(result)
                }
            })
            .map_err(|source| PipelineError::ProviderFailed { provider: kind, source })?;

        result.tl_dr = truncate_chars(result.tl_dr.trim(), TLDR_MAX_CHARS);
        info!("{} produced a summary (model: {:?})", kind, result.model);
        Ok(result)
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Impact / Mitigations / References template shared by the template-style providers.
pub fn three_section_markdown(impact: &str, mitigations: &str) -> String {
    let bullet = |text: &str| {
        if text.trim().is_empty() {
            "-".to_string()
        } else {
            format!("- {}", text.trim())
        }
    };
    [
        "## Impact".to_string(),
        bullet(impact),
        String::new(),
        "## Mitigations".to_string(),
        bullet(mitigations),
        String::new(),
        "## References".to_string(),
        "- (ref:source)".to_string(),
    ]
    .join("\n")
}

/// Prompt for the JSON-producing chat providers. The body is capped at `max_body_chars`.
pub fn structured_prompt(input: &SummaryInput, max_body_chars: usize) -> String {
    format!(
        "Title: {}\nText:\n{}\n\nReturn JSON with keys tl_dr (<=140 chars), summary_md \
         (markdown with Impact/Mitigations/References sections) and citations (array of URLs).",
        input.title().unwrap_or(""),
        truncate_chars(&input.body, max_body_chars)
    )
}

#[derive(Debug, Deserialize)]
struct StructuredSummary {
    #[serde(default)]
    tl_dr: String,
    #[serde(default)]
    summary_md: String,
    #[serde(default)]
    citations: Vec<Value>,
}

/// Parse a model's JSON answer, tolerating a surrounding markdown code fence.
pub fn parse_structured(
    content: &str,
    provider: ProviderKind,
    model: &str,
) -> std::result::Result<SummaryResult, ProviderError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let parsed: StructuredSummary = serde_json::from_str(unfenced)
        .map_err(|e| ProviderError::Parse(format!("summary JSON: {}", e)))?;

    let citations = parsed
        .citations
        .iter()
        .filter_map(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("url")
                .or_else(|| map.get("href"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect();

    Ok(SummaryResult {
        tl_dr: parsed.tl_dr,
        summary_md: parsed.summary_md,
        citations,
        provider,
        model: Some(model.to_string()),
    })
}

/// Fail with the status and a bounded slice of the body on non-2xx responses.
pub(crate) async fn ensure_success(response: Response) -> std::result::Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: truncate_chars(&body, 500),
    })
}

pub(crate) fn require_key<'a>(
    key: &'a Option<String>,
    name: &'static str,
) -> std::result::Result<&'a str, ProviderError> {
    key.as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(ProviderError::MissingKey(name))
}
