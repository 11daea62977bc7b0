use crate::normalize::{extract_cves, hash_content, make_canonical_key};
use crate::types::{IngestItem, IngestionReport, Result};
use interfaces::{AdvisoryStore, NewRawDocument};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// What happened to a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Same fingerprint already stored and linked; nothing written.
    Duplicate,
    /// Raw document stored and linked to this incident.
    Linked(Uuid),
}

/// Writes fetched items into the store: dedupe by fingerprint, upsert the raw document,
/// find or create its incident, link the two.
///
/// Fingerprint uniqueness in the store is the only guard against concurrent runs
/// inserting the same document; nothing here locks.
pub struct IngestionCoordinator<S: AdvisoryStore + ?Sized> {
    store: Arc<S>,
}

impl<S: AdvisoryStore + ?Sized> IngestionCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Ingest a batch. A failure on one item is logged and that item skipped.
    pub async fn ingest(&self, items: &[IngestItem]) -> IngestionReport {
        let mut report = IngestionReport {
            items_seen: items.len(),
            ..Default::default()
        };
        let mut touched = HashSet::new();

        for item in items {
            match self.ingest_item(item).await {
                Ok(ItemOutcome::Linked(incident_id)) => {
                    if touched.insert(incident_id) {
                        report.changed_incident_ids.push(incident_id);
                    }
                }
                Ok(ItemOutcome::Duplicate) => {
                    report.items_skipped += 1;
                }
                Err(e) => {
                    error!("Failed to ingest {}: {}", item.url, e);
                    report.items_skipped += 1;
                }
            }
        }

        info!(
            "Ingested {} items: {} skipped, {} incidents changed",
            report.items_seen,
            report.items_skipped,
            report.changed_incident_ids.len()
        );
        report
    }

    pub async fn ingest_item(&self, item: &IngestItem) -> Result<ItemOutcome> {
        let text = item.fingerprint_text();
        let content_hash = hash_content(&text);

        // A stored but unlinked document is left over from a run that failed before
        // linking; cluster it now instead of treating it as a duplicate.
        if let Some(existing) = self.store.find_raw_by_hash(&content_hash).await? {
            if self.store.is_raw_linked(existing.id).await? {
                debug!("Skipping already ingested {} ({})", item.url, content_hash);
                return Ok(ItemOutcome::Duplicate);
            }
            debug!("Relinking orphaned raw {} ({})", existing.id, content_hash);
        }

        let cves = extract_cves(&text);
        let mut metadata = item.metadata.clone();
        metadata.insert(
            "cves".to_string(),
            Value::Array(cves.iter().cloned().map(Value::String).collect()),
        );

        let raw = self
            .store
            .upsert_raw(NewRawDocument {
                url: item.url.clone(),
                source: item.source.clone(),
                fetched_at: item.fetched_at,
                title: item.title.clone(),
                body_text: item.content.clone(),
                content_hash,
                metadata,
            })
            .await?;

        // Key off the stored row so a relinked orphan lands where its first run would have.
        let fetched_at = raw.fetched_at.to_rfc3339();
        let canonical_key = make_canonical_key(
            &cves,
            Some(raw.source.as_str()),
            Some(fetched_at.as_str()),
            Some(raw.content_hash.as_str()),
            Some(raw.url.as_str()),
        );

        let title = item.title.as_deref().unwrap_or("");
        let incident = self.store.find_or_create_incident(&canonical_key, title).await?;
        self.store.link_source(incident.id, raw.id).await?;

        debug!("Linked raw {} to incident {} ({})", raw.id, incident.id, canonical_key);
        Ok(ItemOutcome::Linked(incident.id))
    }
}
