//! Cycles that hit a failing endpoint or a failing backend

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use statsink::fetch::{FetchError, SnapshotFetcher};
use statsink::scheduler::{CycleOutcome, Scheduler};
use statsink::storage::memory::MemoryBackend;
use statsink::storage::{CycleReport, Rotation, StorageBackend, StorageError, WriteOutcome};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{create_persister, create_scheduler, requests_snapshot, serve_snapshot};

#[tokio::test]
async fn test_server_error_skips_cycle() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;

    assert_matches!(outcome, CycleOutcome::FetchFailed(FetchError::Status(status)) if status.as_u16() == 500);
    assert_eq!(backend.insert_calls(), 0);
}

#[tokio::test]
async fn test_undecodable_body_skips_cycle() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a snapshot</html>"))
        .mount(&mock_server)
        .await;

    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;

    assert_matches!(outcome, CycleOutcome::FetchFailed(FetchError::Decode(_)));
    assert!(backend.table_names().is_empty());
}

#[tokio::test]
async fn test_unreachable_endpoint_skips_cycle() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let fetcher =
        SnapshotFetcher::new(format!("http://127.0.0.1:{port}/"), Duration::from_secs(2)).unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = Scheduler::new(
        fetcher,
        create_persister(&backend, Rotation::None, 30),
        Duration::from_secs(60),
    );

    let outcome = scheduler.run_cycle().await;

    assert_matches!(outcome, CycleOutcome::FetchFailed(FetchError::Request(_)));
    assert_eq!(backend.insert_calls(), 0);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let fetcher = SnapshotFetcher::new(mock_server.uri(), Duration::from_millis(200)).unwrap();
    let result = fetcher.fetch().await;

    assert_matches!(result, Err(FetchError::Request(e)) if e.is_timeout());
}

#[tokio::test]
async fn test_schema_failure_is_reported_and_next_cycle_retries() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_schema_creation("permission denied for schema public");
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;
    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Err(StorageError::SchemaFailed(msg)),
            ..
        }) if msg.contains("permission denied")
    );

    let outcome = scheduler.run_cycle().await;
    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Err(StorageError::SchemaFailed(_)),
            ..
        })
    );
    assert_eq!(backend.insert_calls(), 2);
    assert_eq!(backend.create_calls(), 2);
}

#[tokio::test]
async fn test_transient_insert_failure_recovers() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));
    scheduler.run_cycle().await;

    backend.fail_next_inserts(1);
    let outcome = scheduler.run_cycle().await;

    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Ok(WriteOutcome::InsertedAfterSchemaCreation),
            ..
        })
    );
    assert_eq!(backend.row_count("requests_totals"), 2);
}

#[tokio::test]
async fn test_retention_failure_does_not_undo_the_write() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_deletes_for("requests_histogram");
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;

    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Ok(_),
            sweep: Err(StorageError::RetentionFailed(_)),
            ..
        })
    );
    assert_eq!(backend.row_count("requests_histogram"), 1);
    let deleted = tokio_test::assert_ok!(
        backend
            .delete_before("requests_totals", Utc::now() - chrono::Duration::days(30))
            .await
    );
    assert_eq!(deleted, 0);
}
