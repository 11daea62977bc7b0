use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::defs::Incident;
use crate::defs::ProviderKind;
use crate::defs::RawDocument;
use crate::defs::SummaryProjection;
use crate::defs::SummaryRun;

/// Settings row holding the default summarizer.
pub const SUMMARIZER_SETTING_KEY: &str = "summarizer_provider";

/// Raw document as handed to the store; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRawDocument {
    pub url: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
}

// Implementations are expected to enforce uniqueness themselves (content hash,
// canonical key, link pair, settings key). Callers never lock around these calls.

/// Persistent store over the `raw_items`, `incidents`, `incident_sources` and
/// `summaries` tables plus the key/value settings row.
#[async_trait]
pub trait AdvisoryStore: Send + Sync {
    async fn find_raw_by_hash(&self, content_hash: &str) -> Result<Option<RawDocument>>;

    /// Insert keyed by `content_hash`. On conflict the existing row is returned with
    /// the new metadata merged in; no other column changes.
    async fn upsert_raw(&self, doc: NewRawDocument) -> Result<RawDocument>;

    async fn get_raw(&self, id: Uuid) -> Result<Option<RawDocument>>;

    /// Return the incident for `canonical_key`, creating it with `title` and `kev = false`
    /// when absent. Either way `updated_at` is bumped.
    async fn find_or_create_incident(&self, canonical_key: &str, title: &str) -> Result<Incident>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>>;

    /// Most recently updated incidents first.
    async fn recent_incidents(&self, limit: usize) -> Result<Vec<Incident>>;

    /// Idempotent: writing the same pair twice leaves one row.
    async fn link_source(&self, incident_id: Uuid, raw_id: Uuid) -> Result<()>;

    /// Whether the raw document is linked to any incident.
    async fn is_raw_linked(&self, raw_id: Uuid) -> Result<bool>;

    /// Raw id of the most recently linked source for the incident.
    async fn latest_source(&self, incident_id: Uuid) -> Result<Option<Uuid>>;

    async fn insert_summary(&self, run: &SummaryRun) -> Result<()>;

    async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryRun>>;

    /// Runs for the incident ordered by `ran_at` descending, later inserts first on ties.
    async fn list_summaries(&self, incident_id: Uuid) -> Result<Vec<SummaryRun>>;

    /// Returns whether a row was removed.
    async fn delete_summary(&self, id: Uuid) -> Result<bool>;

    async fn set_projection(&self, incident_id: Uuid, projection: &SummaryProjection) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<Value>>;

    async fn put_setting(&self, key: &str, value: Value) -> Result<()>;
}

/// Read a provider out of a stored settings value. Accepts a bare string,
/// `{"option": ..}` or `{"value": ..}`.
pub fn coerce_provider(value: &Value) -> Option<ProviderKind> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Object(map) => ["option", "value"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(|s| s.parse().ok()),
        _ => None,
    }
}

/// Settings value written for a provider preference.
pub fn provider_setting_value(provider: ProviderKind) -> Value {
    serde_json::json!({ "option": provider.as_str() })
}
