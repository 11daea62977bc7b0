use serde_json::{Map, Value};

use super::{
    first_non_empty, ParsedRecord, RecordFields, CVE_FIELDS, DATE_FIELDS, DESCRIPTION_FIELDS,
    LINK_FIELDS, PRODUCT_FIELDS, REFERENCE_FIELDS, TITLE_FIELDS, VENDOR_FIELDS,
};

/// Records from a JSON feed: the top-level array, or the first array-valued field of the
/// top-level object. A payload with neither becomes one synthetic record.
pub(crate) fn parse_records(body: &str) -> Result<Vec<ParsedRecord>, String> {
    let payload: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;

    let records = match &payload {
        Value::Array(items) => items.iter().map(record_from_value).collect(),
        Value::Object(map) => match map.values().find_map(Value::as_array) {
            Some(items) => items.iter().map(record_from_value).collect(),
            None => vec![record_from_value(&payload)],
        },
        other => vec![record_from_value(other)],
    };

    Ok(records)
}

fn record_from_value(value: &Value) -> ParsedRecord {
    let Some(object) = value.as_object() else {
        let text = value_text(value).unwrap_or_else(|| pretty(value));
        return ParsedRecord {
            body: Some(text),
            ..Default::default()
        };
    };

    // NVD-style wrappers nest the advisory under a single `cve` object.
    let object = match object.get("cve").and_then(Value::as_object) {
        Some(inner) => inner,
        None => object,
    };

    let fields = RecordFields {
        title: lookup(object, TITLE_FIELDS),
        cve: lookup(object, CVE_FIELDS).filter(|id| id.to_uppercase().starts_with("CVE-")),
        description: lookup(object, DESCRIPTION_FIELDS),
        date: lookup(object, DATE_FIELDS),
        vendor: lookup(object, VENDOR_FIELDS),
        product: lookup(object, PRODUCT_FIELDS),
        references: lookup(object, REFERENCE_FIELDS),
        link: lookup(object, LINK_FIELDS).filter(|link| link.starts_with("http")),
    };

    fields.into_record(|| pretty(value))
}

fn lookup(object: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    first_non_empty(candidates.iter().map(|key| object.get(*key).and_then(value_text)))
}

/// Text content of a field. Arrays are joined; objects contribute their `value`,
/// `url` or `href` member.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(map) => ["value", "url", "href"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_text)),
        Value::Null => None,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
