//! End-to-end scrape cycles against a mock endpoint and the memory backend

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Datelike, Utc};
use pretty_assertions::assert_eq;
use statsink::scheduler::CycleOutcome;
use statsink::storage::memory::MemoryBackend;
use statsink::storage::schema::Value;
use statsink::storage::{CycleReport, Rotation, WriteOutcome};

use crate::helpers::{
    create_persister, create_scheduler, mixed_snapshot, requests_snapshot, serve_snapshot,
};

#[tokio::test]
async fn test_first_cycle_creates_and_fills_tables() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;

    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            skipped: 0,
            write: Ok(WriteOutcome::InsertedAfterSchemaCreation),
            sweep: Ok(_),
        })
    );
    assert_eq!(
        backend.table_names(),
        vec!["requests_by_route", "requests_histogram", "requests_totals"]
    );

    let by_route = backend.table("requests_by_route").unwrap();
    let rows: Vec<_> = by_route.rows.iter().map(|r| r.values.clone()).collect();
    assert_eq!(
        rows,
        vec![
            vec![Value::Text("/a".to_string()), Value::Double(1.2), Value::BigInt(5)],
            vec![Value::Text("/b".to_string()), Value::Double(0.4), Value::BigInt(2)],
        ]
    );

    let histogram = backend.table("requests_histogram").unwrap();
    assert_eq!(
        histogram.rows[0].values,
        vec![Value::Double(10.0), Value::BigInt(7)]
    );

    let totals = backend.table("requests_totals").unwrap();
    assert_matches!(totals.rows[0].values[0], Value::Double(d) if (d - 1.6).abs() < 1e-9);
    assert_eq!(totals.rows[0].values[1], Value::BigInt(7));
}

#[tokio::test]
async fn test_rows_of_one_cycle_share_a_timestamp() {
    let mock_server = serve_snapshot(&mixed_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    scheduler.run_cycle().await;

    let times: Vec<_> = backend
        .table_names()
        .iter()
        .filter_map(|name| backend.table(name))
        .flat_map(|table| table.rows.into_iter().map(|r| r.time))
        .collect();
    assert_eq!(times.len(), 2 + 1 + 1 + 3);
    assert!(times.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_second_cycle_appends_without_schema_work() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    scheduler.run_cycle().await;
    let outcome = scheduler.run_cycle().await;

    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Ok(WriteOutcome::Inserted),
            ..
        })
    );
    assert_eq!(backend.create_calls(), 1);
    assert_eq!(backend.row_count("requests_by_route"), 4);
    assert_eq!(backend.row_count("requests_totals"), 2);
}

#[tokio::test]
async fn test_counter_only_metric_maps_to_counts_table() {
    let mock_server = serve_snapshot(&mixed_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    scheduler.run_cycle().await;

    assert!(backend.table("responses_histogram").is_none());
    assert!(backend.table("responses_totals").is_none());

    let counts = backend.table("responses_count_by_status").unwrap();
    assert_eq!(counts.schema.label_column.as_deref(), Some("status"));
    assert_eq!(
        counts.rows[2].values,
        vec![Value::Text("500".to_string()), Value::BigInt(1)]
    );
}

#[tokio::test]
async fn test_monthly_rotation_suffixes_table_names() {
    let mock_server = serve_snapshot(&requests_snapshot()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler =
        create_scheduler(&mock_server, create_persister(&backend, Rotation::Monthly, 30));

    scheduler.run_cycle().await;

    let now = Utc::now();
    let suffix = format!("_in_{:04}_{:02}", now.year(), now.month());
    let names = backend.table_names();
    assert_eq!(names.len(), 3);
    assert!(
        names.iter().all(|name| name.ends_with(&suffix)),
        "{names:?} should end with {suffix}"
    );
}

#[tokio::test]
async fn test_empty_snapshot_touches_nothing() {
    let mock_server = serve_snapshot(&Default::default()).await;
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = create_scheduler(&mock_server, create_persister(&backend, Rotation::None, 30));

    let outcome = scheduler.run_cycle().await;

    assert_matches!(
        outcome,
        CycleOutcome::Persisted(CycleReport {
            write: Ok(WriteOutcome::NothingToWrite),
            ..
        })
    );
    assert_eq!(backend.insert_calls(), 0);
    assert_eq!(backend.create_calls(), 0);
    assert!(backend.table_names().is_empty());
}
