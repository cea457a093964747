pub mod config;
pub mod fetch;
pub mod scheduler;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separates the metric name from the label name in a snapshot key
/// (`"requests|route"`).
pub const KEY_SEPARATOR: char = '|';

/// One scraped sample of every tracked metric/label combination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Snapshot {
    pub names: BTreeMap<String, StatisticSet>,
    pub buckets: Vec<Bucket>,
}

/// Counts, durations and bucket counts for one metric+label combination.
///
/// `counters` and `durations` share their keys (label values) and are
/// combined pairwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatisticSet {
    pub counters: BTreeMap<String, u64>,
    pub durations: BTreeMap<String, f64>,
    pub buckets: BTreeMap<String, u64>,
}

/// A named histogram boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    pub name: String,
    pub value: f64,
}

impl Snapshot {
    /// Iterate over entries as `(metric, label, set)`.
    ///
    /// A key without a separator yields an empty label.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &StatisticSet)> {
        self.names.iter().map(|(key, set)| {
            let (metric, label) = key.split_once(KEY_SEPARATOR).unwrap_or((key.as_str(), ""));
            (metric, label, set)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl StatisticSet {
    /// Sum of all counters, saturating at `u64::MAX`.
    pub fn total_count(&self) -> u64 {
        self.counters
            .values()
            .fold(0u64, |acc, count| acc.saturating_add(*count))
    }

    pub fn total_duration(&self) -> f64 {
        self.durations.values().sum()
    }

    /// Whether this set carries timings (summary/histogram/totals tables)
    /// rather than plain counts.
    pub fn has_durations(&self) -> bool {
        !self.durations.is_empty()
    }
}
