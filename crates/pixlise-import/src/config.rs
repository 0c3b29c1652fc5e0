//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Container Defaults
// ============================================================================

/// Default container for archives and imported datasets.
pub const DEFAULT_DATASETS_BUCKET: &str = "pixlise-datasets";

/// Default container for shared configuration files.
pub const DEFAULT_CONFIG_BUCKET: &str = "pixlise-config";

/// Default container for manually uploaded dataset add-ons.
pub const DEFAULT_MANUAL_BUCKET: &str = "pixlise-manual";

/// Default container for quantification job files.
pub const DEFAULT_JOBS_BUCKET: &str = "pixlise-jobs";

// ============================================================================
// Run Settings
// ============================================================================

/// Default time allowed for one import run, in seconds.
pub const DEFAULT_IMPORT_DEADLINE_SECS: u64 = 900;

/// Default window in which repeat imports of a dataset do not notify again.
pub const DEFAULT_NOTIFICATION_DEBOUNCE_SECS: i64 = 3600;

/// Default time completed jobs stay in the job summary.
pub const DEFAULT_COMPLETED_JOB_VISIBLE_SECS: i64 = 600;

/// Default number of summaries the dataset indexer fetches at once.
pub const DEFAULT_INDEX_FETCH_CONCURRENCY: usize = 16;

/// Default environment name, shown in logs.
pub const DEFAULT_ENVIRONMENT_NAME: &str = "local";

/// Importer and indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub buckets: BucketConfig,
    pub run: RunConfig,
}

/// Container names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub datasets: String,
    pub config: String,
    pub manual: String,
    pub jobs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub import_deadline_secs: u64,
    pub notification_debounce_secs: i64,
    pub completed_job_visible_secs: i64,
    pub index_fetch_concurrency: usize,
    pub environment_name: String,
}

impl RunConfig {
    pub fn import_deadline(&self) -> Duration {
        Duration::from_secs(self.import_deadline_secs)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            buckets: BucketConfig {
                datasets: env_or("DATASETS_BUCKET", DEFAULT_DATASETS_BUCKET.to_string()),
                config: env_or("CONFIG_BUCKET", DEFAULT_CONFIG_BUCKET.to_string()),
                manual: env_or("MANUAL_BUCKET", DEFAULT_MANUAL_BUCKET.to_string()),
                jobs: env_or("JOBS_BUCKET", DEFAULT_JOBS_BUCKET.to_string()),
            },
            run: RunConfig {
                import_deadline_secs: env_or("IMPORT_DEADLINE_SECS", DEFAULT_IMPORT_DEADLINE_SECS),
                notification_debounce_secs: env_or(
                    "NOTIFICATION_DEBOUNCE_SECS",
                    DEFAULT_NOTIFICATION_DEBOUNCE_SECS,
                ),
                completed_job_visible_secs: env_or(
                    "COMPLETED_JOB_VISIBLE_SECS",
                    DEFAULT_COMPLETED_JOB_VISIBLE_SECS,
                ),
                index_fetch_concurrency: env_or("INDEX_FETCH_CONCURRENCY", DEFAULT_INDEX_FETCH_CONCURRENCY),
                environment_name: env_or("ENVIRONMENT_NAME", DEFAULT_ENVIRONMENT_NAME.to_string()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, bucket) in [
            ("DATASETS_BUCKET", &self.buckets.datasets),
            ("CONFIG_BUCKET", &self.buckets.config),
            ("MANUAL_BUCKET", &self.buckets.manual),
            ("JOBS_BUCKET", &self.buckets.jobs),
        ] {
            if bucket.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        if self.run.import_deadline_secs == 0 {
            anyhow::bail!("Import deadline must be greater than 0");
        }

        if self.run.index_fetch_concurrency == 0 {
            anyhow::bail!("Index fetch concurrency must be greater than 0");
        }

        if self.run.notification_debounce_secs < 0 || self.run.completed_job_visible_secs < 0 {
            anyhow::bail!("Time windows cannot be negative");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buckets: BucketConfig {
                datasets: DEFAULT_DATASETS_BUCKET.to_string(),
                config: DEFAULT_CONFIG_BUCKET.to_string(),
                manual: DEFAULT_MANUAL_BUCKET.to_string(),
                jobs: DEFAULT_JOBS_BUCKET.to_string(),
            },
            run: RunConfig {
                import_deadline_secs: DEFAULT_IMPORT_DEADLINE_SECS,
                notification_debounce_secs: DEFAULT_NOTIFICATION_DEBOUNCE_SECS,
                completed_job_visible_secs: DEFAULT_COMPLETED_JOB_VISIBLE_SECS,
                index_fetch_concurrency: DEFAULT_INDEX_FETCH_CONCURRENCY,
                environment_name: DEFAULT_ENVIRONMENT_NAME.to_string(),
            },
        }
    }
}
