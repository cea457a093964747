//! Snapshot fetcher: one HTTP GET, MessagePack body
//!
//! The client is built once and reused for every scrape.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{instrument, trace};

use crate::Snapshot;

/// Errors while fetching a snapshot
#[derive(Debug)]
pub enum FetchError {
    /// Connection failure, timeout, or body read failure
    Request(reqwest::Error),

    /// The endpoint answered with a non-success status
    Status(StatusCode),

    /// The body is not a valid snapshot
    Decode(rmp_serde::decode::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Request(err) => write!(f, "http get: {}", err),
            FetchError::Status(status) => write!(f, "http status: {}", status),
            FetchError::Decode(err) => write!(f, "decoding snapshot: {}", err),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Request(err) => Some(err),
            FetchError::Status(_) => None,
            FetchError::Decode(err) => Some(err),
        }
    }
}

/// Pulls snapshots from a single URL
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    client: reqwest::Client,
    url: String,
}

impl SnapshotFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Request)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self) -> Result<Snapshot, FetchError> {
        trace!("requesting snapshot");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await.map_err(FetchError::Request)?;
        let snapshot: Snapshot = rmp_serde::from_slice(&body).map_err(FetchError::Decode)?;

        trace!(
            "received snapshot with {} entries ({} bytes)",
            snapshot.names.len(),
            body.len()
        );
        Ok(snapshot)
    }
}
