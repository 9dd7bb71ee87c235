#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;
use uuid::Uuid;

use assetflow_core::models::{
    AccessLevel, Asset, Checksum, CreateUploadRequest, CustomMetadata, FinalizeUploadRequest,
    StorageProvider,
};
use assetflow_core::{Caller, DefaultAccessPolicy, Role, StaticDirectory};
use assetflow_db::{AssetStore, JobStore, MemoryStore};
use assetflow_infra::RateLimiter;
use assetflow_services::{
    AssetService, AssetServiceConfig, MediaTools, ProcessingContext, Processors,
};
use assetflow_storage::{LocalStorage, ObjectInfo, PresignedUrl, Storage, StorageError, StorageResult};
use assetflow_worker::{JobHandlerContext, JobQueue, JobQueueConfig};

/// Local storage whose metadata probes can be made to fail like an
/// unreachable backend.
pub struct FlakyStorage {
    inner: LocalStorage,
    failing: AtomicBool,
}

impl FlakyStorage {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.inner.put(storage_key, data, content_type).await
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        self.inner.get(storage_key).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.inner.delete(storage_key).await
    }

    async fn head(&self, storage_key: &str) -> StorageResult<ObjectInfo> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError("connection reset".to_string()));
        }
        self.inner.head(storage_key).await
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.inner.exists(storage_key).await
    }

    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        self.inner.presigned_get_url(storage_key, expires_in).await
    }

    async fn presigned_put_url(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        self.inner
            .presigned_put_url(storage_key, content_type, expires_in)
            .await
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<FlakyStorage>,
    pub directory: Arc<StaticDirectory>,
    pub service: Arc<AssetService>,
    pub context: Arc<ProcessingContext>,
    pub queue: JobQueue,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    /// Organization admin
    pub admin: Caller,
    pub member: Caller,
    pub viewer: Caller,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(AssetServiceConfig::default()).await
    }

    pub async fn with_config(config: AssetServiceConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(
            dir.path().join("objects"),
            "http://localhost:3000/objects".to_string(),
            "test-signing-secret",
        )
        .await
        .unwrap();
        let storage = Arc::new(FlakyStorage {
            inner: local,
            failing: AtomicBool::new(false),
        });

        let organization_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let directory = Arc::new(StaticDirectory::new());
        directory.add_organization(organization_id);
        directory.add_project(organization_id, project_id);

        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(AssetService::new(
            store.clone(),
            store.clone(),
            storage.clone(),
            directory.clone(),
            Arc::new(DefaultAccessPolicy),
            config,
        ));
        let tools = MediaTools::new("ffmpeg", "ffprobe").unwrap();
        let context = Arc::new(ProcessingContext::new(
            service.clone(),
            store.clone(),
            Processors::new(storage.clone(), tools),
        ));
        let queue = JobQueue::new_no_worker(
            store.clone(),
            RateLimiter::new(100.0),
            JobQueueConfig::default(),
        );

        Self {
            store,
            storage,
            directory,
            service,
            context,
            queue,
            organization_id,
            project_id,
            admin: Caller::new(Uuid::new_v4(), organization_id, Role::Admin),
            member: Caller::new(Uuid::new_v4(), organization_id, Role::Member),
            viewer: Caller::new(Uuid::new_v4(), organization_id, Role::Viewer),
            _dir: dir,
        }
    }

    pub fn weak_context(&self) -> Weak<dyn JobHandlerContext> {
        let context: Arc<dyn JobHandlerContext> = self.context.clone();
        Arc::downgrade(&context)
    }

    pub fn upload_request(&self, filename: &str, content: &[u8]) -> CreateUploadRequest {
        CreateUploadRequest {
            organization_id: self.organization_id,
            project_id: self.project_id,
            filename: filename.to_string(),
            mime_type: "image/png".to_string(),
            file_size: content.len() as i64,
            checksum: Checksum::sha256_of(content).to_string(),
            tags: vec!["launch".to_string()],
            access_level: AccessLevel::Private,
            custom_metadata: CustomMetadata::new(),
        }
    }

    /// Create an upload and put the content at its key, without finalizing.
    pub async fn uploaded(&self, filename: &str, content: &[u8], caller: &Caller) -> Uuid {
        let ticket = self
            .service
            .create_upload(self.upload_request(filename, content), caller)
            .await
            .unwrap();
        self.storage
            .put(
                &ticket.storage_key,
                Bytes::copy_from_slice(content),
                "image/png",
            )
            .await
            .unwrap();
        ticket.asset_id
    }

    /// Create, upload and finalize. The asset is left `pending`.
    pub async fn finalized(&self, filename: &str, content: &[u8], caller: &Caller) -> Asset {
        let asset_id = self.uploaded(filename, content, caller).await;
        self.service
            .finalize_upload(asset_id, finalize_request(content), caller)
            .await
            .unwrap()
    }

    /// Run every job that is ready now.
    pub async fn drain(&self) -> usize {
        let context = self.weak_context();
        let mut processed = 0;
        while self.queue.run_once(&context).await.unwrap().is_some() {
            processed += 1;
        }
        processed
    }

    /// Claim the next job as if its scheduled time had come and run one attempt.
    pub async fn run_next_due(&self) -> Option<Uuid> {
        let far_future = chrono::Utc::now() + chrono::Duration::days(1);
        let job = self.store.claim_next("test-worker", far_future).await.unwrap()?;
        let id = job.id;
        self.queue.process(job, &self.weak_context()).await.unwrap();
        Some(id)
    }

    pub async fn asset(&self, asset_id: Uuid) -> Asset {
        self.store.get_asset(asset_id).await.unwrap().unwrap()
    }
}

pub fn finalize_request(content: &[u8]) -> FinalizeUploadRequest {
    FinalizeUploadRequest {
        checksum: Checksum::sha256_of(content).to_string(),
        size: content.len() as i64,
    }
}

/// A solid-color PNG; `seed` varies the color so checksums differ.
pub fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([seed, 64, 128, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}
