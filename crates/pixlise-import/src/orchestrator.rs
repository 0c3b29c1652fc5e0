//! One import run, from trigger to written dataset and notification

use chrono::{DateTime, Utc};
use pixlise_common::{PixliseError, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::archive::{decode_manual_upload_path, order_archives, ArchiveTree};
use crate::assemble::{DatasetAssembler, ImportParams};
use crate::breadboard::unconfigured_import_params;
use crate::config::BucketConfig;
use crate::debounce::DebounceStore;
use crate::layout::{Layout, LayoutClassifier};
use crate::notify::{Notification, NotificationSink};
use crate::output::DatasetOutput;
use crate::paths;
use crate::product_id::base_name;
use crate::storage::{DeadlineStore, ObjectStore, ObjectStoreExt};
use crate::summary::{SummaryFile, UpdateKind};
use crate::trigger::{IngestTrigger, IngestTriggerDecoder};

/// Optional parameter file at the archive root
pub const PARAM_FILE: &str = "import.json";
/// Optional per-archive overrides at the archive root
pub const CONFIG_FILE: &str = "config.json";
/// Optional user customisation, usually a manual add-on
pub const CUSTOM_META_FILE: &str = "custom-meta.json";

/// `updateType` that imports without telling anyone
const TRIVIAL_UPDATE: &str = "trivial";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ArchiveConfig {
    name: String,
    detector: String,
    group: String,
    update_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CustomMeta {
    title: String,
    default_context_image: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub trigger: IngestTrigger,
    pub layout: Layout,
    pub summary: SummaryFile,
    /// `None` for a dataset seen for the first time
    pub update: Option<UpdateKind>,
    pub notified: bool,
}

pub struct ImportOrchestrator {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn NotificationSink>,
    buckets: BucketConfig,
    debounce_secs: i64,
}

fn read_json<T: serde::de::DeserializeOwned + Default>(tree: &ArchiveTree, path: &str) -> Result<T> {
    match tree.get(path) {
        Some(data) => serde_json::from_slice(data).map_err(|e| PixliseError::invalid_format(path, e.to_string())),
        None => Ok(T::default()),
    }
}

impl ImportOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn NotificationSink>,
        buckets: BucketConfig,
        debounce_secs: i64,
    ) -> Self {
        Self {
            store,
            sink,
            buckets,
            debounce_secs,
        }
    }

    pub async fn run(&self, payload: &[u8], deadline: Instant) -> Result<ImportOutcome> {
        self.run_at(payload, deadline, Utc::now()).await
    }

    pub async fn run_at(&self, payload: &[u8], deadline: Instant, now: DateTime<Utc>) -> Result<ImportOutcome> {
        let trigger = IngestTriggerDecoder.decode_at(payload, now)?;
        let span = info_span!("import", dataset_id = %trigger.dataset_id, log_id = %trigger.log_id);
        let store = DeadlineStore::new(Arc::clone(&self.store), deadline);

        let result = self.import(&store, trigger, now).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| error!(error = %e, "Import failed"));
        }
        result
    }

    async fn import(&self, store: &DeadlineStore, trigger: IngestTrigger, now: DateTime<Utc>) -> Result<ImportOutcome> {
        let id = trigger.dataset_id.clone();

        if !trigger.is_reimport() {
            let dest = paths::archive_key(base_name(&trigger.source_key));
            info!(from = %trigger.source_key, to = %dest, "Copying new archive");
            store
                .copy(&trigger.source_container, &trigger.source_key, &self.buckets.datasets, &dest)
                .await?;
        }

        let tree = self.gather(store, &id).await?;
        let ranges = match store
            .get(&self.buckets.config, paths::PSEUDO_INTENSITY_RANGES)
            .await
        {
            Ok(data) => Some(data),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let (layout, classified) = LayoutClassifier::new(ranges.as_deref()).classify(&tree)?;
        let archive_config: ArchiveConfig = read_json(&tree, CONFIG_FILE)?;
        let params = self.import_params(&tree, &id, &archive_config, layout)?;

        let assembled = DatasetAssembler.assemble(classified, &params)?;
        let output = DatasetOutput::build(&assembled, &tree, now.timestamp())?;

        let prior = match store
            .get_json::<SummaryFile>(&self.buckets.datasets, &paths::dataset_summary(&id))
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) if e.is_not_found() => None,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to read previous summary, treating dataset as new");
                None
            },
        };

        store.check("writing dataset")?;
        output.write(store, &self.buckets.datasets).await?;

        let update = prior.map(|old| UpdateKind::classify(&old, &output.summary));
        match update {
            Some(kind) => info!(update = %kind, "Dataset updated"),
            None => info!("New dataset"),
        }

        let notified = if archive_config.update_type == TRIVIAL_UPDATE {
            info!("Trivial update, not notifying");
            false
        } else {
            self.notify(store, &id, update, now.timestamp()).await
        };

        let debounce = DebounceStore::new(store, &self.buckets.config);
        if let Err(e) = debounce.put(&id, now.timestamp()).await {
            warn!(error = %e, "Failed to record import time");
        }

        Ok(ImportOutcome {
            trigger,
            layout,
            summary: output.summary,
            update,
            notified,
        })
    }

    /// Extracts every archive of the dataset oldest first, then lays the
    /// manual add-ons over the result.
    async fn gather(&self, store: &DeadlineStore, id: &str) -> Result<ArchiveTree> {
        let listed = store.list(&self.buckets.datasets, &paths::archive_prefix(id)).await?;
        let archives = order_archives(&listed)?;
        if archives.is_empty() {
            return Err(PixliseError::not_found(
                self.buckets.datasets.as_str(),
                paths::archive_prefix(id),
            ));
        }

        let mut tree = ArchiveTree::new();
        for key in &archives {
            let data = store.get(&self.buckets.datasets, key).await?;
            let count = tree.extract_zip(&data, key)?;
            info!(archive = %key, files = count, "Extracted archive");
        }

        for key in store.list(&self.buckets.manual, &paths::addons_prefix(id)).await? {
            let path = decode_manual_upload_path(&key)?;
            let data = store.get(&self.buckets.manual, &key).await?;
            info!(key = %key, path = %path, "Applying manual upload");
            tree.insert(path, data);
        }
        Ok(tree)
    }

    fn import_params(
        &self,
        tree: &ArchiveTree,
        id: &str,
        config: &ArchiveConfig,
        layout: Layout,
    ) -> Result<ImportParams> {
        let mut params = match (tree.get(PARAM_FILE), layout) {
            (Some(data), _) => ImportParams::from_param_file(data, PARAM_FILE)?,
            (None, Layout::Breadboard) => unconfigured_import_params(id),
            (None, _) => ImportParams::default(),
        };
        if !params.dataset_id.is_empty() && params.dataset_id != id {
            warn!(param_id = %params.dataset_id, "Parameter file names another dataset, using the trigger's id");
        }
        params.dataset_id = id.to_string();

        if !config.detector.is_empty() {
            params.detector_config = config.detector.clone();
        }
        if !config.group.is_empty() {
            params.group = config.group.clone();
        }
        if !config.name.trim().is_empty() {
            params.title = config.name.clone();
        }

        let custom: CustomMeta = read_json(tree, CUSTOM_META_FILE)?;
        if !custom.title.trim().is_empty() {
            info!(title = %custom.title, "Applying custom title");
            params.title = custom.title;
        }
        if !custom.default_context_image.is_empty() {
            params.default_context_image = custom.default_context_image;
        }
        Ok(params)
    }

    /// Debounced notification; failures are only logged
    async fn notify(&self, store: &DeadlineStore, id: &str, update: Option<UpdateKind>, now: i64) -> bool {
        let debounce = DebounceStore::new(store, &self.buckets.config);
        let last = debounce.get(id).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read import times");
            0
        });
        if last > 0 && now - last < self.debounce_secs {
            info!(seconds_since_last = now - last, "Imported recently, not notifying");
            return false;
        }

        let notification = match update {
            None => Notification::new_dataset(id),
            Some(kind) => Notification::dataset_updated(id, kind),
        };
        match self.sink.notify(&notification).await {
            Ok(()) => {
                info!(topic = %notification.topic, "Notified");
                true
            },
            Err(e) => {
                warn!(topic = %notification.topic, error = %e, "Notification failed");
                false
            },
        }
    }
}
