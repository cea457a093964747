use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::trace;

use crate::storage::{Backend, Rotation};

/// Command line arguments; every setting overrides the config file
#[derive(Debug, Clone, Default, Parser)]
#[command(version, about = "Scrape metric snapshots into PostgreSQL or MySQL")]
pub struct Args {
    /// JSON config file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Single URL to scrape for MessagePack snapshots
    #[arg(long)]
    pub scrape: Option<String>,

    /// Seconds between scrape requests
    #[arg(long)]
    pub every: Option<u64>,

    /// HTTP timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Database dialect
    #[arg(long, value_enum)]
    pub db: Option<Backend>,

    /// Database connection string
    #[arg(long)]
    pub dsn: Option<String>,

    /// Delete rows older than this many days
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Start new tables every calendar period
    #[arg(long, value_enum)]
    pub rotate: Option<Rotation>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "crate::util::get_scrape_url")]
    pub url: String,

    #[serde(default = "crate::util::get_default_interval")]
    pub interval_secs: u64,

    #[serde(default = "crate::util::get_default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            url: crate::util::get_scrape_url(),
            interval_secs: crate::util::get_default_interval(),
            timeout_secs: crate::util::get_default_timeout(),
        }
    }
}

impl ScrapeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, serde::Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    #[serde(default = "crate::util::get_dsn")]
    pub dsn: String,

    /// Retention period in days (rows older than this are deleted)
    #[serde(default = "crate::util::get_default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub rotation: Rotation,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dsn: crate::util::get_dsn(),
            retention_days: crate::util::get_default_retention_days(),
            rotation: Rotation::default(),
        }
    }
}

// The DSN may carry credentials.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("dsn", &"<redacted>")
            .field("retention_days", &self.retention_days)
            .field("rotation", &self.rotation)
            .finish()
    }
}

fn default_backend() -> Backend {
    Backend::Postgres
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Defaults, then the config file (if any), then command line flags
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.file {
            Some(path) => read_config_file(path)?,
            None => Config::default(),
        };
        config.apply_args(args);
        config.validate()?;
        trace!("resolved config: {config:?}");
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(url) = &args.scrape {
            self.scrape.url = url.clone();
        }
        if let Some(every) = args.every {
            self.scrape.interval_secs = every;
        }
        if let Some(timeout) = args.timeout {
            self.scrape.timeout_secs = timeout;
        }
        if let Some(backend) = args.db {
            self.storage.backend = backend;
        }
        if let Some(dsn) = &args.dsn {
            self.storage.dsn = dsn.clone();
        }
        if let Some(days) = args.retention_days {
            self.storage.retention_days = days;
        }
        if let Some(rotation) = args.rotate {
            self.storage.rotation = rotation;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scrape.interval_secs == 0 {
            anyhow::bail!("scrape interval must be at least one second");
        }
        if self.scrape.timeout_secs == 0 {
            anyhow::bail!("scrape timeout must be at least one second");
        }
        if self.scrape.url.trim().is_empty() {
            anyhow::bail!("scrape URL must not be empty");
        }
        if self.storage.dsn.trim().is_empty() {
            anyhow::bail!("database DSN must not be empty");
        }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
