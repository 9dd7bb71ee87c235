use std::sync::Arc;

use assetflow_core::models::StorageProvider;
use assetflow_core::Config;

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageError, StorageResult};

/// Secret used for local presigned URLs when none is configured outside production.
#[cfg(feature = "storage-local")]
const DEVELOPMENT_SIGNING_SECRET: &str = "assetflow-development-signing-secret";

/// Create a storage backend based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    match config.storage_backend {
        #[cfg(feature = "storage-s3")]
        StorageProvider::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config.s3_region.clone().ok_or_else(|| {
                StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;

            let storage = S3Storage::new(bucket, region, config.s3_endpoint.clone()).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageProvider::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageProvider::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let base_url = config.local_storage_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_BASE_URL not configured".to_string())
            })?;
            let secret = match &config.local_storage_signing_secret {
                Some(secret) => secret.clone(),
                None if !config.is_production() => {
                    tracing::warn!("LOCAL_STORAGE_SIGNING_SECRET not set, using development secret");
                    DEVELOPMENT_SIGNING_SECRET.to_string()
                }
                None => {
                    return Err(StorageError::ConfigError(
                        "LOCAL_STORAGE_SIGNING_SECRET not configured".to_string(),
                    ))
                }
            };

            let storage = LocalStorage::new(base_path, base_url, secret).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageProvider::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
