use interfaces::ProviderKind;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    ensure_success, require_key, three_section_markdown, truncate_chars, ProviderError, SummaryInput,
    TLDR_MAX_CHARS,
};
use crate::config::ApiSettings;
use crate::types::SummaryResult;

const MAX_BODY_CHARS: usize = 5000;

/// Inference call against a summarization model. The free-text answer is split into
/// sentences: the first two become Impact, the rest Mitigations.
pub async fn summarize(
    client: &Client,
    settings: &ApiSettings,
    input: &SummaryInput,
) -> Result<SummaryResult, ProviderError> {
    let api_key = require_key(&settings.api_key, "HUGGINGFACE_API_KEY")?;

    let body = json!({
        "inputs": truncate_chars(&input.body, MAX_BODY_CHARS),
        "parameters": { "max_length": 220, "min_length": 40, "do_sample": false },
        "options": { "wait_for_model": true },
    });

    let response = client
        .post(format!(
            "{}/models/{}",
            settings.base_url.trim_end_matches('/'),
            settings.model
        ))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;
    let payload: Value = ensure_success(response).await?.json().await?;

    let summary = summary_text(&payload)?;
    let sentences = split_sentences(&summary);
    let impact = sentences.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
    let mitigations = sentences.iter().skip(2).cloned().collect::<Vec<_>>().join(" ");

    let tl_dr = input
        .title()
        .map(str::to_string)
        .or_else(|| sentences.first().cloned())
        .unwrap_or_default();

    Ok(SummaryResult {
        tl_dr: truncate_chars(&tl_dr, TLDR_MAX_CHARS),
        summary_md: three_section_markdown(&impact, &mitigations),
        citations: Vec::new(),
        provider: ProviderKind::HuggingFace,
        model: Some(settings.model.clone()),
    })
}

fn summary_text(payload: &Value) -> Result<String, ProviderError> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(ProviderError::Parse(error.to_string()));
    }

    let entry = match payload {
        Value::Array(entries) => entries.first(),
        other => Some(other),
    };

    entry
        .and_then(|e| e.get("summary_text").or_else(|| e.get("generated_text")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Parse("response had no summary text".to_string()))
}

/// Split after `.`, `!` or `?` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}
