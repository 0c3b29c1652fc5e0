//! PIXLISE Import - dataset importer and catalog indexers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pixlise_common::logging::{init_logging, LogConfig, LogLevel};
use pixlise_import::config::Config;
use pixlise_import::indexer::{decode_job_status_key, DatasetIndexer, JobSummaryIndexer};
use pixlise_import::notify::LoggingSink;
use pixlise_import::orchestrator::ImportOrchestrator;
use pixlise_import::storage::{connect, DeadlineStore, ObjectStore, StorageConfig};
use pixlise_import::trigger::decode_storage_event;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pixlise-import")]
#[command(author, version, about = "PIXLISE dataset importer and catalog indexers")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Seconds allowed for the whole run, overrides IMPORT_DEADLINE_SECS
    #[arg(long, env = "PIXLISE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a dataset from a trigger payload
    Import {
        /// Storage-change envelope or re-import request
        #[arg(short, long)]
        payload_file: PathBuf,
    },

    /// Rebuild the dataset index from every dataset summary
    IndexDatasets,

    /// Rebuild one dataset's job summary
    IndexJobs {
        /// Changed status key, JobStatus/<dataset>/<job>-status.json
        #[arg(short, long)]
        key: String,
    },

    /// Route a storage-change envelope to the indexers
    Event {
        #[arg(short, long)]
        payload_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pixlise-import".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.overlay_env()?;

    init_logging(&log_config)?;

    let config = Config::load()?;
    let storage_config = StorageConfig::from_env()?;
    let store = connect(&storage_config).await?;
    let deadline = Instant::now()
        + cli
            .deadline_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.run.import_deadline());
    info!(
        environment = %config.run.environment_name,
        backend = ?storage_config.backend,
        "Starting"
    );

    match cli.command {
        Command::Import { payload_file } => {
            let payload = read_payload(&payload_file)?;
            let importer = ImportOrchestrator::new(
                store,
                Arc::new(LoggingSink),
                config.buckets.clone(),
                config.run.notification_debounce_secs,
            );
            let outcome = importer.run(&payload, deadline).await?;
            info!(
                dataset_id = %outcome.summary.dataset_id,
                layout = %outcome.layout,
                notified = outcome.notified,
                "Import complete"
            );
        },
        Command::IndexDatasets => {
            dataset_indexer(store, &config, deadline).run().await?;
        },
        Command::IndexJobs { key } => {
            job_indexer(store, &config, deadline)
                .run(&key, chrono::Utc::now().timestamp())
                .await?;
        },
        Command::Event { payload_file } => {
            let payload = read_payload(&payload_file)?;
            route_event(store, &config, deadline, &payload).await?;
        },
    }

    Ok(())
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read payload {}", path.display()))
}

fn dataset_indexer(store: Arc<dyn ObjectStore>, config: &Config, deadline: Instant) -> DatasetIndexer {
    DatasetIndexer::new(
        Arc::new(DeadlineStore::new(store, deadline)),
        config.buckets.datasets.clone(),
        config.buckets.config.clone(),
        config.run.index_fetch_concurrency,
    )
}

fn job_indexer(store: Arc<dyn ObjectStore>, config: &Config, deadline: Instant) -> JobSummaryIndexer {
    JobSummaryIndexer::new(
        Arc::new(DeadlineStore::new(store, deadline)),
        config.buckets.jobs.clone(),
        config.run.completed_job_visible_secs,
    )
}

/// Runs the dataset indexer once per event and the job indexer once per
/// dataset with changed status files. Every indexer runs even if an earlier one fails.
async fn route_event(store: Arc<dyn ObjectStore>, config: &Config, deadline: Instant, payload: &[u8]) -> Result<()> {
    let objects = decode_storage_event(payload)?;

    let mut index_datasets = false;
    let mut job_keys = BTreeMap::new();
    for object in objects {
        if DatasetIndexer::handles_key(&object.key) {
            index_datasets = true;
        } else if let Ok((dataset_id, _)) = decode_job_status_key(&object.key) {
            job_keys.insert(dataset_id, object.key);
        } else {
            warn!(container = %object.container, key = %object.key, "No indexer for key");
        }
    }

    let mut failures = 0;
    if index_datasets {
        if let Err(e) = dataset_indexer(Arc::clone(&store), config, deadline).run().await {
            warn!(error = %e, "Dataset index rebuild failed");
            failures += 1;
        }
    }
    let now = chrono::Utc::now().timestamp();
    for key in job_keys.values() {
        if let Err(e) = job_indexer(Arc::clone(&store), config, deadline).run(key, now).await {
            warn!(key = %key, error = %e, "Job summary rebuild failed");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} indexer runs failed", failures);
    }
    Ok(())
}
