use interfaces::ProviderKind;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ensure_success, parse_structured, require_key, structured_prompt, ProviderError, SummaryInput};
use crate::config::ApiSettings;
use crate::types::SummaryResult;

const MAX_BODY_CHARS: usize = 6000;

/// generateContent call with a JSON response MIME type.
pub async fn summarize(
    client: &Client,
    settings: &ApiSettings,
    input: &SummaryInput,
) -> Result<SummaryResult, ProviderError> {
    let api_key = require_key(&settings.api_key, "GEMINI_API_KEY")?;

    let body = json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": structured_prompt(input, MAX_BODY_CHARS) }],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "temperature": 0.2,
        },
    });

    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        settings.base_url.trim_end_matches('/'),
        settings.model
    );
    let response = client
        .post(url)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await?;
    let payload: Value = ensure_success(response).await?.json().await?;

    let text: String = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::Parse("no text in first candidate".to_string()));
    }

    parse_structured(&text, ProviderKind::Gemini, &settings.model)
}
