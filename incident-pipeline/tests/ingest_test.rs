mod common;

use common::{init_tracing, item};
use incident_pipeline::ingest::{IngestionCoordinator, ItemOutcome};
use incident_pipeline::normalize::hash_content;
use incident_pipeline::store::MemoryStore;
use async_trait::async_trait;
use interfaces::{AdvisoryStore, Incident, NewRawDocument, RawDocument, SummaryProjection, SummaryRun};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_reingesting_same_batch_is_a_noop() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestionCoordinator::new(store.clone());

    let batch = vec![
        item("https://example.com/a", "Exchange CVE-2024-21410", "Privilege escalation"),
        item("https://example.com/b", "Router firmware", "No CVE assigned yet"),
    ];

    let first = coordinator.ingest(&batch).await;
    assert_eq!(first.items_seen, 2);
    assert_eq!(first.items_skipped, 0);
    assert_eq!(first.changed_incident_ids.len(), 2);

    let second = coordinator.ingest(&batch).await;
    assert_eq!(second.items_skipped, 2);
    assert!(second.changed_incident_ids.is_empty());

    assert_eq!(store.raw_count().await, 2);
    assert_eq!(store.incident_count().await, 2);
    assert_eq!(store.link_count().await, 2);
}

#[tokio::test]
async fn test_documents_sharing_a_cve_cluster_together() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestionCoordinator::new(store.clone());

    let batch = vec![
        item(
            "https://vendor.example/a",
            "Vendor advisory",
            "Fixes CVE-2024-3400 and CVE-2024-3401",
        ),
        item("https://news.example/b", "News coverage", "Attackers exploit cve-2024-3400"),
    ];

    let report = coordinator.ingest(&batch).await;

    assert_eq!(report.changed_incident_ids.len(), 1);
    assert_eq!(store.raw_count().await, 2);
    assert_eq!(store.incident_count().await, 1);

    let incident_id = report.changed_incident_ids[0];
    let incident = store.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(incident.canonical_key, "CVE-2024-3400");
    assert_eq!(incident.title, "Vendor advisory");
    assert!(!incident.kev);
    assert_eq!(store.sources_for(incident_id).await.len(), 2);
}

#[tokio::test]
async fn test_item_without_cve_gets_fallback_key() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestionCoordinator::new(store.clone());

    let advisory = item("https://example.com/a", "Router firmware", "No CVE assigned yet");
    let fingerprint = hash_content(&advisory.fingerprint_text());

    let outcome = coordinator.ingest_item(&advisory).await.unwrap();
    let ItemOutcome::Linked(incident_id) = outcome else {
        panic!("expected a linked incident, got {:?}", outcome);
    };

    let incident = store.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(
        incident.canonical_key,
        format!("example.com:2024-03-01:{}", &fingerprint[..12])
    );

    let raw = store.find_raw_by_hash(&fingerprint).await.unwrap().unwrap();
    assert_eq!(raw.metadata["cves"], json!([]));
    assert_eq!(raw.body_text.as_deref(), Some("No CVE assigned yet"));

    assert_eq!(
        coordinator.ingest_item(&advisory).await.unwrap(),
        ItemOutcome::Duplicate
    );
}

#[tokio::test]
async fn test_changed_ids_are_deduplicated_in_order() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestionCoordinator::new(store.clone());

    let batch = vec![
        item("https://a.example/1", "First", "CVE-2024-0001 details"),
        item("https://b.example/2", "Second", "CVE-2024-0002 details"),
        item("https://c.example/3", "Third", "More on CVE-2024-0001"),
    ];

    let report = coordinator.ingest(&batch).await;
    assert_eq!(report.changed_incident_ids.len(), 2);

    let first = store
        .get_incident(report.changed_incident_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.canonical_key, "CVE-2024-0001");
}

#[tokio::test]
async fn test_incident_keeps_first_title_and_bumps_updated_at() {
    let store = MemoryStore::new();

    let created = store.find_or_create_incident("CVE-2024-0001", "").await.unwrap();
    let titled = store
        .find_or_create_incident("CVE-2024-0001", "Named later")
        .await
        .unwrap();
    let again = store
        .find_or_create_incident("CVE-2024-0001", "Another name")
        .await
        .unwrap();

    assert_eq!(created.id, again.id);
    assert_eq!(titled.title, "Named later");
    assert_eq!(again.title, "Named later");
    assert!(again.updated_at >= created.updated_at);
}

#[tokio::test]
async fn test_link_source_is_idempotent_and_latest_wins() {
    let store = MemoryStore::new();
    let incident = store.find_or_create_incident("key", "title").await.unwrap();
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();

    store.link_source(incident.id, a).await.unwrap();
    store.link_source(incident.id, b).await.unwrap();
    store.link_source(incident.id, a).await.unwrap();

    assert_eq!(store.link_count().await, 2);
    assert_eq!(store.latest_source(incident.id).await.unwrap(), Some(b));
}

#[tokio::test]
async fn test_upsert_merges_metadata_on_hash_conflict() {
    use common::fixed_time;
    use interfaces::NewRawDocument;

    let store = MemoryStore::new();
    let doc = |metadata: serde_json::Value| NewRawDocument {
        url: "https://example.com/a".to_string(),
        source: "example.com".to_string(),
        fetched_at: fixed_time(),
        title: Some("Title".to_string()),
        body_text: Some("Body".to_string()),
        content_hash: "abcdef0123456789".to_string(),
        metadata: metadata.as_object().cloned().unwrap_or_default(),
    };

    let first = store.upsert_raw(doc(json!({ "format": "rss" }))).await.unwrap();
    let second = store
        .upsert_raw(doc(json!({ "format": "json", "cves": ["CVE-2024-0001"] })))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(store.raw_count().await, 1);
    assert_eq!(second.metadata["format"], json!("json"));
    assert_eq!(second.metadata["cves"], json!(["CVE-2024-0001"]));
}

/// Delegates to a `MemoryStore` but fails the first incident lookup.
struct FailFirstIncident {
    inner: MemoryStore,
    failed: AtomicBool,
}

#[async_trait]
impl AdvisoryStore for FailFirstIncident {
    async fn find_raw_by_hash(&self, content_hash: &str) -> anyhow::Result<Option<RawDocument>> {
        self.inner.find_raw_by_hash(content_hash).await
    }
    async fn upsert_raw(&self, doc: NewRawDocument) -> anyhow::Result<RawDocument> {
        self.inner.upsert_raw(doc).await
    }
    async fn get_raw(&self, id: Uuid) -> anyhow::Result<Option<RawDocument>> {
        self.inner.get_raw(id).await
    }
    async fn find_or_create_incident(&self, canonical_key: &str, title: &str) -> anyhow::Result<Incident> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            anyhow::bail!("connection reset");
        }
        self.inner.find_or_create_incident(canonical_key, title).await
    }
    async fn get_incident(&self, id: Uuid) -> anyhow::Result<Option<Incident>> {
        self.inner.get_incident(id).await
    }
    async fn recent_incidents(&self, limit: usize) -> anyhow::Result<Vec<Incident>> {
        self.inner.recent_incidents(limit).await
    }
    async fn link_source(&self, incident_id: Uuid, raw_id: Uuid) -> anyhow::Result<()> {
        self.inner.link_source(incident_id, raw_id).await
    }
    async fn is_raw_linked(&self, raw_id: Uuid) -> anyhow::Result<bool> {
        self.inner.is_raw_linked(raw_id).await
    }
    async fn latest_source(&self, incident_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        self.inner.latest_source(incident_id).await
    }
    async fn insert_summary(&self, run: &SummaryRun) -> anyhow::Result<()> {
        self.inner.insert_summary(run).await
    }
    async fn get_summary(&self, id: Uuid) -> anyhow::Result<Option<SummaryRun>> {
        self.inner.get_summary(id).await
    }
    async fn list_summaries(&self, incident_id: Uuid) -> anyhow::Result<Vec<SummaryRun>> {
        self.inner.list_summaries(incident_id).await
    }
    async fn delete_summary(&self, id: Uuid) -> anyhow::Result<bool> {
        self.inner.delete_summary(id).await
    }
    async fn set_projection(&self, incident_id: Uuid, projection: &SummaryProjection) -> anyhow::Result<()> {
        self.inner.set_projection(incident_id, projection).await
    }
    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.get_setting(key).await
    }
    async fn put_setting(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.inner.put_setting(key, value).await
    }
}

#[tokio::test]
async fn test_unlinked_document_is_clustered_on_retry() {
    init_tracing();
    let store = Arc::new(FailFirstIncident {
        inner: MemoryStore::new(),
        failed: AtomicBool::new(false),
    });
    let coordinator = IngestionCoordinator::new(store.clone());
    let batch = vec![item("https://example.com/a", "Exchange CVE-2024-21410", "Privilege escalation")];

    let first = coordinator.ingest(&batch).await;
    assert!(first.changed_incident_ids.is_empty());
    assert_eq!(first.items_skipped, 1);
    assert_eq!(store.inner.raw_count().await, 1);
    assert_eq!(store.inner.incident_count().await, 0);

    let second = coordinator.ingest(&batch).await;
    assert_eq!(second.items_skipped, 0);
    assert_eq!(second.changed_incident_ids.len(), 1);
    assert_eq!(store.inner.raw_count().await, 1);
    assert_eq!(store.inner.incident_count().await, 1);
    assert_eq!(store.inner.link_count().await, 1);

    let third = coordinator.ingest(&batch).await;
    assert_eq!(third.items_skipped, 1);
    assert!(third.changed_incident_ids.is_empty());
}
