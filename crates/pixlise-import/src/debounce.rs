//! Last successful import time per dataset

use pixlise_common::{PixliseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::paths::IMPORT_TIMES;
use crate::storage::{ObjectStore, ObjectStoreExt};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTimes {
    #[serde(default)]
    pub times: BTreeMap<String, i64>,
}

/// Reads and writes `DatasetConfig/import-times.json`. Read-modify-write is
/// not atomic; racing imports may each notify once.
pub struct DebounceStore<'a> {
    store: &'a dyn ObjectStore,
    container: &'a str,
}

impl<'a> DebounceStore<'a> {
    pub fn new(store: &'a dyn ObjectStore, container: &'a str) -> Self {
        Self { store, container }
    }

    /// A missing file is empty, a malformed one is logged and treated as
    /// empty so the next save replaces it.
    async fn load(&self) -> Result<ImportTimes> {
        match self.store.get_json::<ImportTimes>(self.container, IMPORT_TIMES).await {
            Ok(times) => Ok(times),
            Err(e) if e.is_not_found() => Ok(ImportTimes::default()),
            Err(PixliseError::Serialization(e)) => {
                warn!(error = %e, key = IMPORT_TIMES, "Ignoring malformed import times file");
                Ok(ImportTimes::default())
            },
            Err(e) => Err(e),
        }
    }

    /// Unix seconds of the last import, 0 if never
    pub async fn get(&self, dataset_id: &str) -> Result<i64> {
        Ok(self.load().await?.times.get(dataset_id).copied().unwrap_or(0))
    }

    pub async fn put(&self, dataset_id: &str, unix_sec: i64) -> Result<()> {
        let mut times = self.load().await?;
        times.times.insert(dataset_id.to_string(), unix_sec);
        self.store.put_json(self.container, IMPORT_TIMES, &times).await?;
        debug!(dataset_id, unix_sec, "Recorded import time");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let debounce = DebounceStore::new(&store, "config");
        assert_eq!(debounce.get("123").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_keeps_other_datasets() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let debounce = DebounceStore::new(&store, "config");

        debounce.put("123", 1000).await.unwrap();
        debounce.put("456", 2000).await.unwrap();
        assert_eq!(debounce.get("123").await.unwrap(), 1000);

        let raw: serde_json::Value = store.get_json("config", IMPORT_TIMES).await.unwrap();
        assert_eq!(raw, serde_json::json!({"times": {"123": 1000, "456": 2000}}));
    }

    #[tokio::test]
    async fn test_malformed_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("config", IMPORT_TIMES, b"{not json".to_vec()).await.unwrap();

        let debounce = DebounceStore::new(&store, "config");
        assert_eq!(debounce.get("123").await.unwrap(), 0);
        debounce.put("123", 5).await.unwrap();
        assert_eq!(debounce.get("123").await.unwrap(), 5);
    }
}
