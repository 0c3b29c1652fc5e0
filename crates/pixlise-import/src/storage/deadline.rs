//! Bounds every storage call by a run deadline

use async_trait::async_trait;
use pixlise_common::{PixliseError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

use super::ObjectStore;

#[derive(Clone)]
pub struct DeadlineStore {
    inner: Arc<dyn ObjectStore>,
    deadline: Instant,
}

impl DeadlineStore {
    pub fn new(inner: Arc<dyn ObjectStore>, deadline: Instant) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Fails with `Cancelled` once the deadline has passed
    pub fn check(&self, what: &str) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(PixliseError::Cancelled(format!("deadline passed before {what}")));
        }
        Ok(())
    }

    async fn bounded<T: Send>(&self, what: String, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        self.check(&what)?;
        timeout_at(self.deadline, call)
            .await
            .map_err(|_| PixliseError::Cancelled(format!("deadline passed during {what}")))?
    }
}

#[async_trait]
impl ObjectStore for DeadlineStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        self.bounded(format!("list {container}/{prefix}"), self.inner.list(container, prefix))
            .await
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        self.bounded(format!("get {container}/{key}"), self.inner.get(container, key))
            .await
    }

    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.bounded(format!("put {container}/{key}"), self.inner.put(container, key, data))
            .await
    }

    async fn copy(&self, src_container: &str, src_key: &str, dst_container: &str, dst_key: &str) -> Result<()> {
        self.bounded(
            format!("copy {src_container}/{src_key}"),
            self.inner.copy(src_container, src_key, dst_container, dst_key),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use std::time::Duration;
    use tempfile::TempDir;

    struct SlowStore;

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn list(&self, _: &str, _: &str) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
            Err(PixliseError::not_found(container, key))
        }

        async fn put(&self, _: &str, _: &str, _: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_is_cancelled() {
        let store = DeadlineStore::new(Arc::new(SlowStore), Instant::now() + Duration::from_secs(5));
        let err = store.list("b", "p").await.unwrap_err();
        assert!(err.is_cancelled());

        // The clock now sits on the deadline, so later calls fail up front
        assert!(store.get("b", "k").await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_errors_pass_through() {
        let store = DeadlineStore::new(Arc::new(SlowStore), Instant::now() + Duration::from_secs(5));
        assert!(store.get("b", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_within_deadline() {
        let dir = TempDir::new().unwrap();
        let store = DeadlineStore::new(
            Arc::new(LocalStore::new(dir.path())),
            Instant::now() + Duration::from_secs(30),
        );
        store.put("b", "k", vec![7]).await.unwrap();
        assert_eq!(store.get("b", "k").await.unwrap(), vec![7]);
        assert!(store.check("writing").is_ok());
    }
}
