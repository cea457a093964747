//! Test helpers shared by the integration tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use statsink::fetch::SnapshotFetcher;
use statsink::scheduler::Scheduler;
use statsink::storage::memory::MemoryBackend;
use statsink::storage::{Persister, Rotation, SchemaMapper, StorageBackend};
use statsink::{Bucket, Snapshot, StatisticSet};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// The `requests|route` snapshot: two routes, one bucket
pub fn requests_snapshot() -> Snapshot {
    Snapshot {
        names: BTreeMap::from([(
            "requests|route".to_string(),
            StatisticSet {
                counters: BTreeMap::from([("/a".to_string(), 5), ("/b".to_string(), 2)]),
                durations: BTreeMap::from([("/a".to_string(), 1.2), ("/b".to_string(), 0.4)]),
                buckets: BTreeMap::from([("le10".to_string(), 7)]),
            },
        )]),
        buckets: vec![Bucket {
            name: "le10".to_string(),
            value: 10.0,
        }],
    }
}

/// A snapshot with a timed metric and a plain counter
pub fn mixed_snapshot() -> Snapshot {
    let mut snapshot = requests_snapshot();
    snapshot.names.insert(
        "responses|status".to_string(),
        StatisticSet {
            counters: BTreeMap::from([
                ("200".to_string(), 40),
                ("404".to_string(), 3),
                ("500".to_string(), 1),
            ]),
            ..Default::default()
        },
    );
    snapshot
}

/// Start a mock metrics endpoint serving `snapshot` at `/metrics`
pub async fn serve_snapshot(snapshot: &Snapshot) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(rmp_serde::to_vec_named(snapshot).unwrap()),
        )
        .mount(&mock_server)
        .await;
    mock_server
}

pub fn create_persister(
    backend: &Arc<MemoryBackend>,
    rotation: Rotation,
    retention_days: u32,
) -> Persister {
    let backend: Arc<dyn StorageBackend> = backend.clone();
    Persister::new(backend, SchemaMapper::new(rotation), retention_days)
}

pub fn create_scheduler(mock_server: &MockServer, persister: Persister) -> Scheduler {
    let fetcher = SnapshotFetcher::new(
        format!("{}/metrics", mock_server.uri()),
        Duration::from_secs(2),
    )
    .unwrap();
    Scheduler::new(fetcher, persister, Duration::from_secs(60))
}
