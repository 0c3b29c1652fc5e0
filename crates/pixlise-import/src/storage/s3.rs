use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use pixlise_common::{PixliseError, Result};
use tracing::{debug, info, instrument};

use super::{ObjectStore, StorageConfig};

#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => {
                let credentials = Credentials::new(access, secret, None, None, "pixlise-import");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            },
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };
        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = %config.region, endpoint = ?config.endpoint, "S3 storage client initialized");
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(container)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| PixliseError::storage(container, prefix, e.to_string()))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        debug!(count = keys.len(), "Listed s3://{}/{}", container, prefix);
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    PixliseError::not_found(container, key)
                } else {
                    PixliseError::storage(container, key, e.to_string())
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PixliseError::storage(container, key, e.to_string()))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), container, key);
        Ok(data)
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| PixliseError::storage(container, key, e.to_string()))?;

        debug!("Uploaded s3://{}/{}", container, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy(&self, src_container: &str, src_key: &str, dst_container: &str, dst_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(dst_container)
            .copy_source(format!("{src_container}/{src_key}"))
            .key(dst_key)
            .send()
            .await
            .map_err(|e| PixliseError::storage(src_container, src_key, e.to_string()))?;

        info!(
            "Copied s3://{}/{} to s3://{}/{}",
            src_container, src_key, dst_container, dst_key
        );
        Ok(())
    }
}
