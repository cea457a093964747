use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use statsink::{
    config::{Args, Config},
    fetch::SnapshotFetcher,
    scheduler::Scheduler,
    storage::{self, Persister, SchemaMapper},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init(verbose: u8) {
    dotenv::dotenv().ok();

    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new()
        .with_targets(vec![("statsink", level)])
        .with_default(LevelFilter::WARN);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = Config::load(&args)?;

    let backend = storage::connect(config.storage.backend, &config.storage.dsn)
        .await
        .with_context(|| format!("cannot open {} database", config.storage.backend))?;
    let backend: Arc<dyn storage::StorageBackend> = Arc::from(backend);

    let health = backend.health_check().await?;
    if !health.healthy {
        anyhow::bail!("{}", health.message);
    }
    info!("{}", health.message);

    let fetcher = SnapshotFetcher::new(config.scrape.url.clone(), config.scrape.timeout())
        .context("cannot build HTTP client")?;
    let persister = Persister::new(
        backend.clone(),
        SchemaMapper::new(config.storage.rotation),
        config.storage.retention_days,
    );
    let scheduler = Scheduler::new(fetcher, persister, config.scrape.interval());

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Err(e) = backend.close().await {
        warn!("{e}");
    }
    Ok(())
}
