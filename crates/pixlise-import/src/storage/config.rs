use pixlise_common::{PixliseError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default S3 region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default root directory of the local backend.
pub const DEFAULT_LOCAL_ROOT: &str = "./data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = PixliseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            other => Err(PixliseError::Config(format!("unknown storage backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; without them the default AWS chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub local_root: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            backend: env::var("STORAGE_BACKEND")
                .ok()
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(StorageBackend::S3),
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            local_root: env::var("LOCAL_STORAGE_ROOT")
                .unwrap_or_else(|_| DEFAULT_LOCAL_ROOT.to_string())
                .into(),
        })
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Local,
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            local_root: root.into(),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: Some(endpoint.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::local(DEFAULT_LOCAL_ROOT)
        }
    }
}
