//! atlas-ingest - change event consumer
//!
//! Loads configuration, opens the shared database, and runs one ingest worker
//! per broker partition plus the equivalence index refresher until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atlas_common::config::TomlConfig;
use atlas_common::db::{
    init_database, SqliteContentStore, SqliteEquivalenceIndex, SqliteRefreshQueue, SqliteTopicStore,
};
use atlas_common::SourceRegistry;
use atlas_ingest::{
    BrokerSettings, Handlers, IndexRefresher, IngestPool, IngestWorker, RefreshSettings, SqliteBroker,
};

/// Command-line arguments for atlas-ingest
#[derive(Parser, Debug)]
#[command(name = "atlas-ingest")]
#[command(about = "Change event consumer for the Atlas content index")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "ATLAS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the configuration
    #[arg(short, long, env = "ATLAS_DATABASE")]
    database: Option<PathBuf>,

    /// Number of broker partitions, overriding the configuration
    #[arg(short, long)]
    partitions: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_source) = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(partitions) = args.partitions {
        anyhow::ensure!(partitions > 0, "--partitions must be at least 1");
        config.ingest.partitions = partitions;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        revision = env!("ATLAS_GIT_REVISION"),
        built = env!("ATLAS_BUILT_AT"),
        profile = env!("ATLAS_BUILD_PROFILE"),
        "Starting atlas-ingest"
    );
    if config_source.is_default() {
        warn!("Configuration: {}", config_source);
    } else {
        info!("Configuration: {}", config_source);
    }
    info!("Database: {}", config.database_path.display());

    let db = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let registry = SourceRegistry::builtin();
    let content = Arc::new(SqliteContentStore::new(db.clone(), registry.clone()));
    let topics = Arc::new(SqliteTopicStore::new(db.clone()));
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));

    // The refresher outlives the workers so it can drain their last requests
    let cancel = CancellationToken::new();
    let refresher_cancel = CancellationToken::new();
    let refresh_settings = RefreshSettings {
        max_backoff: Duration::from_millis(config.ingest.refresh_max_backoff_ms),
        poll_interval: Duration::from_millis(config.ingest.poll_interval_ms),
        ..RefreshSettings::default()
    };
    let (refresher, refresher_task) = IndexRefresher::spawn(
        index.clone(),
        Arc::new(SqliteRefreshQueue::new(db.clone())),
        refresh_settings,
        refresher_cancel.clone(),
    );

    let broker = SqliteBroker::new(db.clone(), BrokerSettings::from(&config.ingest))
        .await
        .context("Failed to open broker subscription")?;

    let worker = Arc::new(IngestWorker::new(
        registry,
        Handlers::new(content, topics, index),
        refresher,
    ));
    let pool = IngestPool::new(
        Arc::new(broker),
        worker,
        Duration::from_millis(config.ingest.poll_interval_ms),
    );
    let workers = pool.spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received Ctrl+C, shutting down");
    cancel.cancel();

    for handle in workers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Ingest worker ended abnormally");
        }
    }
    drop(pool);
    refresher_cancel.cancel();
    if let Err(e) = refresher_task.await {
        warn!(error = %e, "Index refresher ended abnormally");
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}
