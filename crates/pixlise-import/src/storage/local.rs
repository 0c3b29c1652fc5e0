//! Filesystem backend, one directory per container

use async_trait::async_trait;
use pixlise_common::{PixliseError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::ObjectStore;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, container: &str, key: &str) -> PathBuf {
        self.root.join(container).join(key)
    }
}

/// Every file under `dir`, as `/`-joined paths relative to `base`
fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let key: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(key.join("/"));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    #[instrument(skip(self))]
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let base = self.root.join(container);
        let prefix_owned = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut keys = Vec::new();
            match walk(&base, &base, &mut keys) {
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                other => other?,
            }
            keys.retain(|k| k.starts_with(&prefix_owned));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| PixliseError::storage(container, prefix, e.to_string()))??;

        debug!(count = keys.len(), "Listed {}/{}", container, prefix);
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path(container, key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PixliseError::not_found(container, key)),
            Err(e) => Err(PixliseError::storage(container, key, e.to_string())),
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path(container, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PixliseError::storage(container, key, e.to_string()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| PixliseError::storage(container, key, e.to_string()))?;
        debug!("Wrote {}/{}", container, key);
        Ok(())
    }
}
