mod common;

use common::{fetch_config, init_tracing, recency, scraper_config, FakeScraper, Scripted, KEV_JSON};
use incident_pipeline::config::PipelineConfig;
use incident_pipeline::pipeline::IncidentPipeline;
use incident_pipeline::store::MemoryStore;
use incident_pipeline::types::PipelineError;
use interfaces::{AdvisoryStore, ProviderKind};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(seeds: Vec<String>) -> PipelineConfig {
    PipelineConfig {
        seeds,
        fetch: fetch_config(),
        recency: recency(50),
        scraper: scraper_config(),
        summary_batch_limit: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ingest_then_summarize() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kev.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(KEV_JSON, "application/json"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let scraper = FakeScraper::new(vec![]);
    let pipeline = IncidentPipeline::new(
        config(vec![format!("{}/kev.json", server.uri())]),
        store.clone(),
        scraper.clone(),
    )
    .unwrap();

    // No explicit seeds: the configured ones are used.
    let report = pipeline.run_ingestion(&[]).await.unwrap();
    assert_eq!(report.items_seen, 3);
    assert_eq!(report.changed_incident_ids.len(), 3);
    assert_eq!(scraper.calls(), 0);

    let again = pipeline.run_ingestion(&[]).await.unwrap();
    assert_eq!(again.items_skipped, 3);
    assert!(again.changed_incident_ids.is_empty());

    let batch = pipeline.run_summary_batch(None, None).await.unwrap();
    assert_eq!(batch.provider, ProviderKind::RuleBased);
    assert_eq!(batch.changed_incident_ids.len(), 2);
    assert!(batch.failed_incident_ids.is_empty());

    let incident_id = batch.changed_incident_ids[0];
    let incident = store.get_incident(incident_id).await.unwrap().unwrap();
    assert!(incident.canonical_key.starts_with("CVE-"));
    assert_eq!(incident.last_summary_provider, Some(ProviderKind::RuleBased));

    let runs = pipeline.list_summary_runs(incident_id).await.unwrap();
    assert_eq!(runs.len(), 1);

    let remaining = pipeline.delete_summary_run(runs[0].id).await.unwrap();
    assert!(remaining.is_none());
}

#[tokio::test]
async fn test_ingestion_with_no_working_seed_fails() {
    init_tracing();
    let server = MockServer::start().await;

    let store = Arc::new(MemoryStore::new());
    let scraper = FakeScraper::new(vec![Scripted::ApiError("unavailable".to_string())]);
    let pipeline = IncidentPipeline::new(config(vec![]), store.clone(), scraper).unwrap();

    let err = pipeline
        .run_ingestion(&[format!("{}/nothing", server.uri())])
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoSourcesSucceeded { attempted: 1 }));
    assert_eq!(store.raw_count().await, 0);
}

#[tokio::test]
async fn test_set_default_provider_round_trips() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = IncidentPipeline::new(config(vec![]), store, FakeScraper::new(vec![])).unwrap();

    pipeline.set_default_provider(ProviderKind::HuggingFace).await.unwrap();
    assert_eq!(pipeline.default_provider().await, ProviderKind::HuggingFace);
}
