//! Object storage for uploaded images
//!
//! `ObjectStorage` hides where bytes end up: a local directory served under
//! the public uploads prefix, or an S3 bucket when built with `s3-storage`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageDriver};
use crate::services::error::{ServiceError, ServiceResult};

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store bytes under `key` and return the public URL
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub url: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
}

pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Invalid storage key: {}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create upload directory {:?}", parent))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write upload {:?}", path))?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete upload {:?}", path)),
        }
    }
}

#[cfg(feature = "s3-storage")]
pub mod s3 {
    use super::*;
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::config::{Credentials, Region};
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;

    pub struct S3Storage {
        client: Client,
        bucket: String,
        public_base_url: String,
    }

    impl S3Storage {
        pub async fn new(config: &StorageConfig) -> Result<Self> {
            let bucket = config
                .s3_bucket
                .clone()
                .context("S3 bucket must be configured when using the s3 storage driver")?;

            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &config.s3_region {
                loader = loader.region(Region::new(region.clone()));
            }
            let shared = loader.load().await;

            let mut builder = aws_sdk_s3::config::Builder::from(&shared);
            if let (Some(access), Some(secret)) = (&config.s3_access_key, &config.s3_secret_key) {
                builder = builder.credentials_provider(Credentials::new(
                    access.clone(),
                    secret.clone(),
                    None,
                    None,
                    "tirestore-static",
                ));
            }
            if let Some(endpoint) = &config.s3_endpoint {
                builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
            }

            let public_base_url = if config.public_base_url.starts_with("http") {
                config.public_base_url.trim_end_matches('/').to_string()
            } else if let Some(endpoint) = &config.s3_endpoint {
                format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
            } else {
                let region = config.s3_region.as_deref().unwrap_or("us-east-1");
                format!("https://{}.s3.{}.amazonaws.com", bucket, region)
            };

            Ok(Self {
                client: Client::from_conf(builder.build()),
                bucket,
                public_base_url,
            })
        }
    }

    #[async_trait]
    impl ObjectStorage for S3Storage {
        async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(bytes.to_vec()))
                .send()
                .await
                .with_context(|| format!("failed to upload object {key}"))?;
            Ok(format!("{}/{}", self.public_base_url, key))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .with_context(|| format!("failed to delete object {key}"))?;
            Ok(())
        }
    }
}

pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.driver {
        StorageDriver::Local => {
            tracing::info!(path = ?config.path, "Using local upload storage");
            Ok(Arc::new(LocalStorage::new(&config.path, &config.public_base_url)))
        }
        StorageDriver::S3 => {
            #[cfg(feature = "s3-storage")]
            {
                let storage = s3::S3Storage::new(config).await?;
                tracing::info!("Using S3 upload storage");
                Ok(Arc::new(storage))
            }

            #[cfg(not(feature = "s3-storage"))]
            {
                anyhow::bail!(
                    "S3 storage driver is configured but the 's3-storage' feature is not enabled. \
                     Rebuild with `--features s3-storage` or use the 'local' driver."
                )
            }
        }
    }
}

/// Validates uploads against the storage policy and stores them
pub struct UploadService {
    storage: Arc<dyn ObjectStorage>,
    config: StorageConfig,
}

impl UploadService {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: StorageConfig) -> Self {
        Self { storage, config }
    }

    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    /// Store an image under `folder/YYYY/MM/<uuid>.<ext>`
    pub async fn upload(
        &self,
        folder: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> ServiceResult<StoredObject> {
        let content_type = content_type.trim().to_lowercase();
        if !self.config.is_type_allowed(&content_type) {
            return Err(ServiceError::Validation(format!(
                "File type {} is not allowed. Allowed types: {}",
                content_type,
                self.config.allowed_types.join(", ")
            )));
        }
        if bytes.is_empty() {
            return Err(ServiceError::validation("Uploaded file is empty"));
        }
        if bytes.len() as u64 > self.config.max_file_size {
            return Err(ServiceError::Validation(format!(
                "File too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.config.max_file_size
            )));
        }

        let folder = crate::services::error::slugify(folder);
        let folder = if folder.is_empty() { "misc".to_string() } else { folder };
        let key = format!(
            "{}/{}/{}.{}",
            folder,
            Utc::now().format("%Y/%m"),
            Uuid::new_v4(),
            self.config.get_extension(&content_type)
        );

        let url = self
            .storage
            .put(&key, bytes, &content_type)
            .await
            .map_err(ServiceError::Internal)?;

        tracing::info!(%key, size = bytes.len(), "Stored upload");
        Ok(StoredObject {
            url,
            key,
            size: bytes.len() as u64,
            content_type,
        })
    }

    pub async fn delete(&self, key: &str) -> ServiceResult<()> {
        self.storage.delete(key).await.map_err(ServiceError::Internal)
    }
}
