//! League API integration tests
//!
//! Tests the HTTP transport and the league API adapter against a mocked
//! server including:
//! - Status code mapping and Retry-After hints
//! - Adaptive slow-down after rate limiting
//! - Per-resource parse failures and source-level structural failures

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use nhl_stats_sync::config::Config;
use nhl_stats_sync::error::{FetchError, TransportError};
use nhl_stats_sync::models::{Resource, Season, Source, SourceHealth, SourceState};
use nhl_stats_sync::plugins::sources::{NhlApiAdapter, SourceAdapter};
use nhl_stats_sync::sync::{CancelSignal, FetchClient, HttpTransport, SyncOrchestrator, Transport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> Arc<HttpTransport> {
    Arc::new(HttpTransport::new(&Config::default().http).expect("http client"))
}

/// Test 1: Successful responses carry body and content type
#[tokio::test]
async fn test_transport_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/standings/now"))
        .respond_with(ResponseTemplate::new(200).set_body_json(standings_body()))
        .mount(&server)
        .await;

    let response = transport()
        .get(&format!("{}/standings/now", server.uri()))
        .await
        .expect("request succeeds");

    assert_eq!(response.status, 200);
    assert!(response
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("application/json"));
    let doc: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(doc["standings"].as_array().unwrap().len(), 2);
}

/// Test 2: Error statuses map to transport errors
#[tokio::test]
async fn test_transport_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = transport();

    let limited = transport.get(&format!("{}/limited", server.uri())).await;
    assert_eq!(limited.unwrap_err(), TransportError::RateLimited(Some(7)));

    let down = transport.get(&format!("{}/down", server.uri())).await;
    assert_eq!(down.unwrap_err(), TransportError::HttpStatus(503));

    let missing = transport.get(&format!("{}/nowhere", server.uri())).await;
    assert_eq!(missing.unwrap_err(), TransportError::HttpStatus(404));
}

/// Test 3: A missing resource is not retried
#[tokio::test]
async fn test_missing_resource_not_retried() {
    let server = MockServer::start().await;
    let config = create_test_config(&[(Source::NhlApi, &server.uri())]);
    let client = FetchClient::new(Source::NhlApi, &config.source(Source::NhlApi), transport());

    let result = client
        .fetch(&Resource::new("player_landing", "/player/1/landing"), &CancelSignal::never())
        .await;

    match result {
        Err(FetchError::Permanent { cause, .. }) => {
            assert_eq!(cause, TransportError::HttpStatus(404));
        }
        other => panic!("expected permanent failure, got {:?}", other),
    }
    assert_eq!(client.attempts_made(), 1);
    assert_eq!(client.retries(), 0);
}

/// Test 4: A 429 stretches the source interval for later requests
#[tokio::test]
async fn test_rate_limited_response_slows_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/standings/now"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/standings/now"))
        .respond_with(ResponseTemplate::new(200).set_body_json(standings_body()))
        .mount(&server)
        .await;

    let config = create_test_config(&[(Source::NhlApi, &server.uri())]);
    let client = FetchClient::new(Source::NhlApi, &config.source(Source::NhlApi), transport());
    assert_eq!(client.rate_limiter().current_interval().await, Duration::ZERO);

    let payload = client
        .fetch(&Resource::new("standings", "/standings/now"), &CancelSignal::never())
        .await
        .expect("second attempt succeeds");

    assert_eq!(client.attempts_made(), 2);
    assert_eq!(client.rate_limiter().current_interval().await, Duration::from_secs(1));
    assert_eq!(client.health(), SourceHealth::Healthy);
    assert!(client.recent_attempts()[0].outcome.is_failure());

    let records = NhlApiAdapter::new().parse(&payload).expect("standings parse");
    assert_eq!(records.len(), 4);
}

/// Test 5: An unreadable document fails only its own resource
#[tokio::test]
async fn test_malformed_document_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/schedule/2023-10-10"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_nhl_api(&server).await;

    let config = create_test_config(&[(Source::NhlApi, &server.uri())]);
    let orchestrator =
        SyncOrchestrator::new(Arc::new(config), transport(), create_test_store().await);

    let report = orchestrator
        .sync(&[Source::NhlApi], &test_scope(), CancelSignal::never())
        .await
        .unwrap();

    let api = report.source(Source::NhlApi).unwrap();
    assert_eq!(api.state, SourceState::Completed);
    assert_eq!(api.fetched, 10);
    assert_eq!(api.failed, 1);
    assert_eq!(api.failures[0].resource, "/schedule/2023-10-10");
}

/// Test 6: A changed document layout ends the source
#[tokio::test]
async fn test_structural_change_fails_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/standings/now"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"teams": []})),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&[(Source::NhlApi, &server.uri())]);
    let orchestrator =
        SyncOrchestrator::new(Arc::new(config), transport(), create_test_store().await);

    let report = orchestrator
        .sync(&[Source::NhlApi], &test_scope(), CancelSignal::never())
        .await
        .unwrap();

    let api = report.source(Source::NhlApi).unwrap();
    assert_eq!(api.state, SourceState::Failed);
    assert_eq!(api.fetched, 1);
    assert_eq!(api.failed, 1);
    assert_eq!(api.skipped, 9);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
}

/// Test 7: Resources follow the scope's season
#[test]
fn test_resources_follow_season() {
    let mut scope = test_scope();
    scope.season = Season::new(2021);

    let adapter = NhlApiAdapter::new();
    let paths: Vec<String> = adapter.list_resources(&scope).map(|r| r.path).collect();
    assert!(paths.contains(&"/skater-stats-leaders/20212022/2?categories=points&limit=-1".to_string()));
    assert!(paths.contains(&"/goalie-stats-leaders/20212022/2?categories=wins&limit=-1".to_string()));
}
