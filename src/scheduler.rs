//! Scrape scheduler - fetch a snapshot, persist it, repeat
//!
//! ## Timing
//!
//! Ticks are laid out on a fixed grid from the moment the loop starts, so
//! the time a cycle takes does not shift later cycles. When a cycle overruns
//! its slot, one late tick fires as soon as it finishes and the ones after
//! it fall back onto the grid; ticks never pile up.
//!
//! Cycles are strictly sequential. Shutdown is observed between cycles only.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::fetch::{FetchError, SnapshotFetcher};
use crate::storage::{CycleReport, Persister};

/// What happened in one scrape cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// The snapshot could not be fetched; nothing was written
    FetchFailed(FetchError),

    /// The snapshot was handed to the persister
    Persisted(CycleReport),
}

/// Runs scrape cycles on a fixed period
pub struct Scheduler {
    fetcher: SnapshotFetcher,
    persister: Persister,
    period: Duration,
}

impl Scheduler {
    pub fn new(fetcher: SnapshotFetcher, persister: Persister, period: Duration) -> Self {
        Self {
            fetcher,
            persister,
            period,
        }
    }

    /// Fetch one snapshot and persist it
    #[instrument(skip(self), fields(url = %self.fetcher.url()))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let snapshot = match self.fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("scrape failed, skipping cycle: {}", e);
                return CycleOutcome::FetchFailed(e);
            }
        };

        let report = self.persister.persist(&snapshot, Utc::now()).await;
        if !report.is_ok() {
            warn!("cycle finished with errors");
        }
        CycleOutcome::Persisted(report)
    }

    /// Run cycles until `shutdown` resolves; returns the number of cycles run
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        info!(
            "scraping {} every {:?} into {}",
            self.fetcher.url(),
            self.period,
            self.persister.backend().name()
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested, stopping after {} cycles", cycles);
                    break;
                }

                _ = ticker.tick() => {
                    self.run_cycle().await;
                    cycles += 1;
                    debug!("cycle {} complete", cycles);
                }
            }
        }
        cycles
    }
}
