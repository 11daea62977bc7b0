mod common;

use common::{init_tracing, scraper_config};
use incident_pipeline::config::ScraperConfig;
use incident_pipeline::scraper::{normalise_scrape_payload, FirecrawlScraper, ScrapeError, Scraper};
use incident_pipeline::types::PipelineError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ScraperConfig {
    ScraperConfig {
        base_url: server.uri(),
        api_key: Some("fc-test".to_string()),
        ..scraper_config()
    }
}

#[tokio::test]
async fn test_scrape_returns_markdown_and_metadata_title() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/scrape"))
        .and(header("authorization", "Bearer fc-test"))
        .and(body_partial_json(json!({
            "url": "https://vendor.example/advisory",
            "formats": ["markdown"],
            "onlyMainContent": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "markdown": "# Advisory\nPatch the gateway.",
                "metadata": { "title": "Gateway advisory", "statusCode": 200 }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let scraper = FirecrawlScraper::new(&config_for(&server)).unwrap();
    let output = scraper.scrape("https://vendor.example/advisory").await.unwrap();

    assert_eq!(output.url, "https://vendor.example/advisory");
    assert_eq!(output.content, "# Advisory\nPatch the gateway.");
    assert_eq!(output.title.as_deref(), Some("Gateway advisory"));
    assert_eq!(output.metadata["statusCode"], json!(200));

    let item = output.into_item(&scraper.source_name());
    assert_eq!(item.source, "firecrawl");
}

#[tokio::test]
async fn test_reported_failure_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "blocked by robots.txt"
        })))
        .mount(&server)
        .await;

    let scraper = FirecrawlScraper::new(&config_for(&server)).unwrap();
    let err = scraper.scrape("https://vendor.example/").await.unwrap_err();

    assert!(matches!(err, ScrapeError::Api(ref message) if message == "blocked by robots.txt"));
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn test_http_status_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/scrape"))
        .respond_with(ResponseTemplate::new(402).set_body_string("payment required"))
        .mount(&server)
        .await;

    let scraper = FirecrawlScraper::new(&config_for(&server)).unwrap();
    let err = scraper.scrape("https://vendor.example/").await.unwrap_err();

    assert!(err.to_string().contains("402"));
}

#[test]
fn test_normalise_prefers_markdown_then_html_then_raw() {
    let html = normalise_scrape_payload(
        "https://a.example",
        &json!({ "html": "<p>hi</p>", "pageTitle": "Top-level title" }),
    );
    assert_eq!(html.content, "<p>hi</p>");
    assert_eq!(html.title.as_deref(), Some("Top-level title"));

    let raw = normalise_scrape_payload("https://a.example", &json!({ "data": { "status": "queued" } }));
    assert!(raw.content.contains("\"status\": \"queued\""));
    assert_eq!(raw.title, None);
    assert_eq!(raw.fetched_at, None);
}

#[test]
fn test_timeouts_and_cancellation_are_terminal() {
    assert!(ScrapeError::Timeout.is_terminal());
    assert!(ScrapeError::Cancelled.is_terminal());
    assert!(!ScrapeError::Malformed("x".to_string()).is_terminal());
}

#[test]
fn test_base_url_is_validated() {
    let missing = FirecrawlScraper::new(&ScraperConfig {
        base_url: "  ".to_string(),
        ..ScraperConfig::default()
    });
    assert!(matches!(missing, Err(PipelineError::ConfigMissing(_))));

    let invalid = FirecrawlScraper::new(&ScraperConfig {
        base_url: "not a url".to_string(),
        ..ScraperConfig::default()
    });
    assert!(matches!(invalid, Err(PipelineError::InvalidUrl(_))));
}
