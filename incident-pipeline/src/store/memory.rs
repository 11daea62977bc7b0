use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use interfaces::{
    AdvisoryStore, Incident, IncidentSource, NewRawDocument, RawDocument, SummaryProjection, SummaryRun,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    raw_items: HashMap<Uuid, RawDocument>,
    raw_by_hash: HashMap<String, Uuid>,
    incidents: HashMap<Uuid, Incident>,
    incident_by_key: HashMap<String, Uuid>,
    /// Links with their insertion sequence.
    incident_sources: Vec<(IncidentSource, u64)>,
    /// Summary runs with their insertion sequence.
    summaries: Vec<(SummaryRun, u64)>,
    settings: HashMap<String, Value>,
    sequence: u64,
}

impl Tables {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// In-process store with the same uniqueness rules as the relational schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw_count(&self) -> usize {
        self.tables.read().await.raw_items.len()
    }

    pub async fn incident_count(&self) -> usize {
        self.tables.read().await.incidents.len()
    }

    pub async fn link_count(&self) -> usize {
        self.tables.read().await.incident_sources.len()
    }

    /// Raw ids linked to an incident, oldest link first.
    pub async fn sources_for(&self, incident_id: Uuid) -> Vec<Uuid> {
        self.tables
            .read()
            .await
            .incident_sources
            .iter()
            .filter(|(link, _)| link.incident_id == incident_id)
            .map(|(link, _)| link.raw_id)
            .collect()
    }
}

#[async_trait]
impl AdvisoryStore for MemoryStore {
    async fn find_raw_by_hash(&self, content_hash: &str) -> Result<Option<RawDocument>> {
        let tables = self.tables.read().await;
        Ok(tables
            .raw_by_hash
            .get(content_hash)
            .and_then(|id| tables.raw_items.get(id))
            .cloned())
    }

    async fn upsert_raw(&self, doc: NewRawDocument) -> Result<RawDocument> {
        let mut tables = self.tables.write().await;

        if let Some(id) = tables.raw_by_hash.get(&doc.content_hash).copied() {
            let existing = tables
                .raw_items
                .get_mut(&id)
                .ok_or_else(|| anyhow!("dangling content hash {}", doc.content_hash))?;
            existing.metadata.extend(doc.metadata);
            return Ok(existing.clone());
        }

        let raw = RawDocument {
            id: Uuid::new_v4(),
            url: doc.url,
            source: doc.source,
            fetched_at: doc.fetched_at,
            title: doc.title,
            body_text: doc.body_text,
            content_hash: doc.content_hash,
            metadata: doc.metadata,
        };
        tables.raw_by_hash.insert(raw.content_hash.clone(), raw.id);
        tables.raw_items.insert(raw.id, raw.clone());
        Ok(raw)
    }

    async fn get_raw(&self, id: Uuid) -> Result<Option<RawDocument>> {
        Ok(self.tables.read().await.raw_items.get(&id).cloned())
    }

    async fn find_or_create_incident(&self, canonical_key: &str, title: &str) -> Result<Incident> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        if let Some(id) = tables.incident_by_key.get(canonical_key).copied() {
            let incident = tables
                .incidents
                .get_mut(&id)
                .ok_or_else(|| anyhow!("dangling canonical key {}", canonical_key))?;
            if incident.title.is_empty() && !title.is_empty() {
                incident.title = title.to_string();
            }
            incident.updated_at = now;
            return Ok(incident.clone());
        }

        let incident = Incident {
            id: Uuid::new_v4(),
            canonical_key: canonical_key.to_string(),
            title: title.to_string(),
            kev: false,
            cvss_base: None,
            last_summarized_at: None,
            last_summary_provider: None,
            last_summary_model: None,
            updated_at: now,
        };
        tables.incident_by_key.insert(canonical_key.to_string(), incident.id);
        tables.incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.tables.read().await.incidents.get(&id).cloned())
    }

    async fn recent_incidents(&self, limit: usize) -> Result<Vec<Incident>> {
        let tables = self.tables.read().await;
        let mut incidents: Vec<Incident> = tables.incidents.values().cloned().collect();
        incidents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        incidents.truncate(limit);
        Ok(incidents)
    }

    async fn link_source(&self, incident_id: Uuid, raw_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        let link = IncidentSource { incident_id, raw_id };
        if !tables.incident_sources.iter().any(|(existing, _)| *existing == link) {
            let sequence = tables.next_sequence();
            tables.incident_sources.push((link, sequence));
        }
        Ok(())
    }

    async fn is_raw_linked(&self, raw_id: Uuid) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.incident_sources.iter().any(|(link, _)| link.raw_id == raw_id))
    }

    async fn latest_source(&self, incident_id: Uuid) -> Result<Option<Uuid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .incident_sources
            .iter()
            .filter(|(link, _)| link.incident_id == incident_id)
            .max_by_key(|(_, sequence)| *sequence)
            .map(|(link, _)| link.raw_id))
    }

    async fn insert_summary(&self, run: &SummaryRun) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.summaries.iter().any(|(existing, _)| existing.id == run.id) {
            return Err(anyhow!("duplicate summary id {}", run.id));
        }
        let sequence = tables.next_sequence();
        tables.summaries.push((run.clone(), sequence));
        Ok(())
    }

    async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryRun>> {
        let tables = self.tables.read().await;
        Ok(tables
            .summaries
            .iter()
            .find(|(run, _)| run.id == id)
            .map(|(run, _)| run.clone()))
    }

    async fn list_summaries(&self, incident_id: Uuid) -> Result<Vec<SummaryRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<&(SummaryRun, u64)> = tables
            .summaries
            .iter()
            .filter(|(run, _)| run.incident_id == incident_id)
            .collect();
        runs.sort_by(|(a, a_seq), (b, b_seq)| b.ran_at.cmp(&a.ran_at).then(b_seq.cmp(a_seq)));
        Ok(runs.into_iter().map(|(run, _)| run.clone()).collect())
    }

    async fn delete_summary(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.summaries.len();
        tables.summaries.retain(|(run, _)| run.id != id);
        Ok(tables.summaries.len() < before)
    }

    async fn set_projection(&self, incident_id: Uuid, projection: &SummaryProjection) -> Result<()> {
        let mut tables = self.tables.write().await;
        let incident = tables
            .incidents
            .get_mut(&incident_id)
            .ok_or_else(|| anyhow!("incident {} not found", incident_id))?;
        incident.last_summarized_at = projection.last_summarized_at;
        incident.last_summary_provider = projection.provider;
        incident.last_summary_model = projection.model.clone();
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.tables.read().await.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: Value) -> Result<()> {
        self.tables.write().await.settings.insert(key.to_string(), value);
        Ok(())
    }
}
