use interfaces::ProviderKind;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ensure_success, parse_structured, require_key, structured_prompt, ProviderError, SummaryInput};
use crate::config::ApiSettings;
use crate::types::SummaryResult;

const MAX_BODY_CHARS: usize = 6000;

const SYSTEM_PROMPT: &str =
    "You summarize security advisories for incident responders. Answer with a single JSON object.";

/// Chat-completions call asking for a JSON object back.
pub async fn summarize(
    client: &Client,
    settings: &ApiSettings,
    input: &SummaryInput,
) -> Result<SummaryResult, ProviderError> {
    let api_key = require_key(&settings.api_key, "OPENAI_API_KEY")?;

    let body = json!({
        "model": settings.model,
        "temperature": 0.2,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": structured_prompt(input, MAX_BODY_CHARS) },
        ],
    });

    let response = client
        .post(format!("{}/chat/completions", settings.base_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;
    let payload: Value = ensure_success(response).await?.json().await?;

    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Parse("no message content in completion".to_string()))?;

    parse_structured(content, ProviderKind::OpenAi, &settings.model)
}
