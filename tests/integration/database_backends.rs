//! Round trips against live databases
//!
//! Skipped unless `STATSINK_TEST_POSTGRES_URL` / `STATSINK_TEST_MYSQL_URL`
//! point at a scratch database the tests may create tables in.

use std::collections::BTreeMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use statsink::storage::{self, Backend, Persister, Rotation, SchemaMapper, StorageBackend, WriteOutcome};
use statsink::{Snapshot, StatisticSet};

use crate::helpers::requests_snapshot;

/// A snapshot whose table names are unique to this run
fn unique_snapshot() -> (Snapshot, String) {
    let metric = format!("it_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let mut snapshot = requests_snapshot();
    let set = snapshot.names.remove("requests|route").unwrap();
    snapshot.names.insert(format!("{metric}|route"), set);
    snapshot.names.insert(
        format!("{metric}_status|code"),
        StatisticSet {
            counters: BTreeMap::from([("200".to_string(), u64::MAX), ("it's \"quoted\"".to_string(), 1)]),
            ..Default::default()
        },
    );
    (snapshot, metric)
}

async fn round_trip(backend: Backend, dsn: &str) {
    let backend: Arc<dyn StorageBackend> = Arc::from(storage::connect(backend, dsn).await.unwrap());
    assert!(backend.health_check().await.unwrap().healthy);

    let persister = Persister::new(backend.clone(), SchemaMapper::new(Rotation::None), 1);
    let (snapshot, metric) = unique_snapshot();
    let now = Utc::now();

    let first = persister.persist(&snapshot, now - Duration::days(2)).await;
    assert_matches!(first.write, Ok(WriteOutcome::InsertedAfterSchemaCreation));

    let second = persister.persist(&snapshot, now).await;
    assert_matches!(second.write, Ok(WriteOutcome::Inserted));

    // The second cycle's sweep removed the first cycle's rows.
    let sweep = second.sweep.unwrap();
    assert_eq!(sweep.tables, 4);
    assert_eq!(sweep.rows_deleted, 2 + 1 + 1 + 2);

    let tables = backend.existing_tables().await.unwrap();
    assert!(tables.contains(&format!("{metric}_totals")));
    assert!(tables.contains(&format!("{metric}_status_count_by_code")));

    // Everything left is from the second cycle.
    let remaining = backend
        .delete_before(&format!("{metric}_by_route"), now + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(remaining, 2);

    backend.close().await.unwrap();
}

#[cfg(feature = "postgres")]
#[tokio::test]
async fn test_postgres_round_trip() {
    let Ok(dsn) = std::env::var("STATSINK_TEST_POSTGRES_URL") else {
        eprintln!("STATSINK_TEST_POSTGRES_URL not set, skipping");
        return;
    };
    round_trip(Backend::Postgres, &dsn).await;
}

#[cfg(feature = "mysql")]
#[tokio::test]
async fn test_mysql_round_trip() {
    let Ok(dsn) = std::env::var("STATSINK_TEST_MYSQL_URL") else {
        eprintln!("STATSINK_TEST_MYSQL_URL not set, skipping");
        return;
    };
    round_trip(Backend::MySql, &dsn).await;
}

#[tokio::test]
async fn test_malformed_dsn_is_rejected() {
    #[cfg(feature = "postgres")]
    let backend = Backend::Postgres;
    #[cfg(not(feature = "postgres"))]
    let backend = Backend::MySql;

    let result = storage::connect(backend, "not a dsn").await.map(|_| ());

    assert_matches!(result, Err(storage::StorageError::InvalidConfig(_)));
}
