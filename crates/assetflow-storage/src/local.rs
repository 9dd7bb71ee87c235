use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use assetflow_core::models::StorageProvider;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::traits::{ObjectInfo, PresignedUrl, Storage, StorageError, StorageResult};

/// Local filesystem storage implementation
///
/// Presigned URLs point at `base_url` and carry an HMAC-SHA256 signature over
/// `method`, key and expiry, which the file server checks with
/// [`LocalStorage::verify_signature`].
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    /// Keyed once at construction and cloned per signature
    signer: Hmac<Sha256>,
}

impl LocalStorage {
    /// * `base_path` - Root directory for objects (e.g., "/var/lib/assetflow/objects")
    /// * `base_url` - Base URL the objects are served from (e.g., "http://localhost:3000/objects")
    /// * `signing_secret` - Key for presigned URL signatures
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_secret: impl Into<Vec<u8>>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let signing_secret = signing_secret.into();
        if signing_secret.is_empty() {
            return Err(StorageError::ConfigError(
                "Local storage signing secret cannot be empty".to_string(),
            ));
        }

        let signer = Hmac::<Sha256>::new_from_slice(&signing_secret)
            .map_err(|e| StorageError::ConfigError(format!("Invalid signing secret: {}", e)))?;

        Ok(LocalStorage {
            base_path,
            base_url,
            signer,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to a path under the root, refusing anything that could
    /// escape it.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() || storage_key.starts_with('/') || storage_key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' is not a relative path",
                storage_key
            )));
        }
        let relative = Path::new(storage_key);
        let all_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !all_normal || storage_key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid segments",
                storage_key
            )));
        }
        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn mac(&self, method: &str, storage_key: &str, expires: i64) -> Hmac<Sha256> {
        let mut mac = self.signer.clone();
        mac.update(method.as_bytes());
        mac.update(b"\n");
        mac.update(storage_key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn sign(&self, method: &str, storage_key: &str, expires: i64) -> String {
        hex::encode(self.mac(method, storage_key, expires).finalize().into_bytes())
    }

    fn signed_url(&self, method: &str, storage_key: &str, expires_in: Duration) -> PresignedUrl {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).unwrap_or_else(|_| chrono::Duration::zero());
        let expires = expires_at.timestamp();
        let encoded_key = storage_key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = format!(
            "{}/{}?method={}&expires={}&signature={}",
            self.base_url.trim_end_matches('/'),
            encoded_key,
            method,
            expires,
            self.sign(method, storage_key, expires)
        );
        PresignedUrl { url, expires_at }
    }

    /// Check a presigned URL's signature and expiry as of `now`.
    pub fn verify_signature(
        &self,
        method: &str,
        storage_key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        self.mac(method, storage_key, expires)
            .verify_slice(&provided)
            .is_ok()
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, storage_key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // Write to a sibling temp file and rename so readers never see a partial object
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", tmp_path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", tmp_path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", tmp_path.display(), e))
        })?;

        fs::rename(&tmp_path, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to move file into {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(storage_key)?;
        let start = std::time::Instant::now();

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to read file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        tracing::debug!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage get successful"
        );

        Ok(Bytes::from(data))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %storage_key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn head(&self, storage_key: &str) -> StorageResult<ObjectInfo> {
        let path = self.key_to_path(storage_key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(StorageError::NotFound(storage_key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => return Err(StorageError::BackendError(e.to_string())),
        };
        Ok(ObjectInfo {
            key: storage_key.to_string(),
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        match self.head(storage_key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        self.key_to_path(storage_key)?;
        Ok(self.signed_url("GET", storage_key, expires_in))
    }

    async fn presigned_put_url(
        &self,
        storage_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        self.key_to_path(storage_key)?;
        Ok(self.signed_url("PUT", storage_key, expires_in))
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }
}
