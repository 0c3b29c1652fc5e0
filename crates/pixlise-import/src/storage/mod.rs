//! Blob storage seam
//!
//! Every read and write in the importer and the indexers goes through
//! [`ObjectStore`]. Containers are S3 buckets, or top-level directories for
//! the local backend.

use async_trait::async_trait;
use pixlise_common::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub mod config;
pub mod deadline;
pub mod local;
pub mod s3;

pub use config::{StorageBackend, StorageConfig};
pub use deadline::DeadlineStore;
pub use local::LocalStore;
pub use s3::S3Store;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, in no particular order
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;

    /// Fails with `NotFound` when the key is absent
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>>;

    /// Overwrites any existing object
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()>;

    /// Copies between containers
    async fn copy(&self, src_container: &str, src_key: &str, dst_container: &str, dst_key: &str) -> Result<()> {
        let data = self.get(src_container, src_key).await?;
        self.put(dst_container, dst_key, data).await
    }
}

/// JSON helpers for every store
#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    async fn get_json<T: DeserializeOwned>(&self, container: &str, key: &str) -> Result<T> {
        let data = self.get(container, key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes indented JSON
    async fn put_json<T: Serialize + Sync>(&self, container: &str, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.put(container, key, data).await
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}

/// Builds the configured backend
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    Ok(match &config.backend {
        StorageBackend::S3 => Arc::new(S3Store::new(config).await?),
        StorageBackend::Local => Arc::new(LocalStore::new(&config.local_root)),
    })
}
