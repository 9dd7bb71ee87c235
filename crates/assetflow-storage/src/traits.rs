//! Storage abstraction trait
//!
//! The object store gateway: presigned URLs, existence and metadata probes,
//! and raw object I/O. Backends carry no business logic.

use std::time::Duration;

use assetflow_core::models::StorageProvider;
use assetflow_core::AppError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Time-limited URL for direct client access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl PresignedUrl {
    pub(crate) fn expiring_in(url: String, expires_in: Duration) -> Self {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).unwrap_or_else(|_| chrono::Duration::zero());
        Self { url, expires_at }
    }
}

/// Storage abstraction trait
///
/// Keys follow the layout in [`crate::keys`]; backends only check that a key
/// cannot escape their root.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write an object, replacing any existing one at `storage_key`.
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Read a whole object.
    async fn get(&self, storage_key: &str) -> StorageResult<Bytes>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Size and modification time, or `NotFound`.
    async fn head(&self, storage_key: &str) -> StorageResult<ObjectInfo>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// URL a client can GET the object from until it expires.
    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl>;

    /// URL a client can PUT the object to until it expires.
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl>;

    fn provider(&self) -> StorageProvider;
}
