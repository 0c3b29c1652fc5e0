//! Rebuilds `PixliseConfig/datasets.json` from every dataset summary

use futures::stream::{self, StreamExt};
use pixlise_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::paths::{BAD_DATASET_IDS, DATASETS_ROOT, DATASET_INDEX, SUMMARY_FILE};
use crate::storage::{ObjectStore, ObjectStoreExt};
use crate::summary::SummaryFile;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndex {
    pub datasets: Vec<SummaryFile>,
}

pub struct DatasetIndexer {
    store: Arc<dyn ObjectStore>,
    /// Holds `Datasets/`
    datasets_container: String,
    /// Holds the index and the blocklist
    config_container: String,
    concurrency: usize,
}

impl DatasetIndexer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        datasets_container: impl Into<String>,
        config_container: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            datasets_container: datasets_container.into(),
            config_container: config_container.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Whether a change to `key` should rebuild the index
    pub fn handles_key(key: &str) -> bool {
        key.starts_with(&format!("{DATASETS_ROOT}/"))
    }

    async fn blocked_ids(&self) -> BTreeSet<String> {
        match self
            .store
            .get_json::<Vec<String>>(&self.config_container, BAD_DATASET_IDS)
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) if e.is_not_found() => BTreeSet::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read dataset blocklist, indexing everything");
                BTreeSet::new()
            },
        }
    }

    /// Fetches every summary and writes the consolidated index. Summaries
    /// that fail to load are skipped.
    #[instrument(skip(self), fields(container = %self.datasets_container))]
    pub async fn run(&self) -> Result<DatasetIndex> {
        let keys: Vec<String> = self
            .store
            .list(&self.datasets_container, &format!("{DATASETS_ROOT}/"))
            .await?
            .into_iter()
            .filter(|k| k.ends_with(SUMMARY_FILE))
            .collect();
        let blocked = self.blocked_ids().await;
        info!(summaries = keys.len(), blocked = blocked.len(), "Rebuilding dataset index");

        let store = &*self.store;
        let container = self.datasets_container.as_str();
        let fetched: Vec<Option<SummaryFile>> = stream::iter(keys)
            .map(|key| async move {
                match store.get_json::<SummaryFile>(container, &key).await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        error!(key = %key, error = %e, "Failed to read dataset summary, skipping");
                        None
                    },
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut datasets: Vec<SummaryFile> = fetched
            .into_iter()
            .flatten()
            .filter(|s| {
                let keep = !blocked.contains(&s.dataset_id);
                if !keep {
                    info!(dataset_id = %s.dataset_id, "Dataset is blocklisted, leaving it out");
                }
                keep
            })
            .collect();
        datasets.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));

        let index = DatasetIndex { datasets };
        self.store
            .put_json(&self.config_container, DATASET_INDEX, &index)
            .await?;
        info!(datasets = index.datasets.len(), key = DATASET_INDEX, "Wrote dataset index");
        Ok(index)
    }
}
