//! Asset orchestration
//!
//! `AssetService` is the only writer of asset state. Every mutating operation
//! reads a snapshot, plans the next state with the pure lifecycle functions
//! and commits it against the snapshot's revision. A conflict means another
//! writer got there first, so the snapshot is re-read and the plan redone, a
//! bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use assetflow_core::lifecycle::{
    self, DownloadSource, DownloadTarget, FinalizeDecision, NewUpload, Transition,
};
use assetflow_core::models::{
    validate_request, AddVersionRequest, Asset, Checksum, CreateUploadRequest, DownloadTicket,
    FinalizeUploadRequest, JobKind, JobOutcome, ProcessingJob, UpdateDescriptorsRequest,
    UploadTicket, VersionTicket,
};
use assetflow_core::validation::{
    normalize_tags, validate_custom_metadata, validate_filename, validate_mime_type,
};
use assetflow_core::{AccessPolicy, AppError, Caller, Config, ReferenceDirectory};
use assetflow_db::{AssetFilter, AssetStore, Counter, JobStats, JobStore, StoreError};
use assetflow_storage::{original_key, Storage};

/// How often a mutation is re-planned after losing a revision race.
pub const DEFAULT_COMMIT_ATTEMPTS: usize = 5;

/// Upper bound on assets failed by one expired-upload sweep.
pub const EXPIRED_UPLOAD_BATCH: i64 = 500;

#[derive(Debug, Clone)]
pub struct AssetServiceConfig {
    pub upload_url_expiry: Duration,
    pub download_url_expiry: Duration,
    pub max_upload_size_bytes: i64,
    pub commit_attempts: usize,
}

impl Default for AssetServiceConfig {
    fn default() -> Self {
        Self {
            upload_url_expiry: Duration::from_secs(3600),
            download_url_expiry: Duration::from_secs(900),
            max_upload_size_bytes: 5 * 1024 * 1024 * 1024,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }
}

impl From<&Config> for AssetServiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            upload_url_expiry: config.upload_url_expiry(),
            download_url_expiry: config.download_url_expiry(),
            max_upload_size_bytes: config.max_upload_size_bytes,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }
}

/// What a planning step decided for the snapshot it was given.
enum Plan {
    /// Nothing to write; the snapshot is the answer
    Keep,
    Commit(Transition),
    /// Commit the transition, then report the error to the caller
    Reject(Transition, AppError),
}

/// Result of a successful mutation.
struct Applied {
    asset: Asset,
    enqueued: Vec<ProcessingJob>,
}

#[derive(Clone)]
pub struct AssetService {
    assets: Arc<dyn AssetStore>,
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    directory: Arc<dyn ReferenceDirectory>,
    policy: Arc<dyn AccessPolicy>,
    config: AssetServiceConfig,
}

impl AssetService {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        directory: Arc<dyn ReferenceDirectory>,
        policy: Arc<dyn AccessPolicy>,
        config: AssetServiceConfig,
    ) -> Self {
        Self {
            assets,
            jobs,
            storage,
            directory,
            policy,
            config,
        }
    }

    pub fn config(&self) -> &AssetServiceConfig {
        &self.config
    }

    /// Register an asset in `uploading` with version 1 pre-registered and
    /// return a presigned URL to upload its content to.
    #[tracing::instrument(
        skip(self, request, caller),
        fields(
            organization_id = %request.organization_id,
            project_id = %request.project_id,
            user_id = %caller.user_id
        )
    )]
    pub async fn create_upload(
        &self,
        request: CreateUploadRequest,
        caller: &Caller,
    ) -> Result<UploadTicket, AppError> {
        validate_request(&request)?;
        validate_filename(&request.filename)?;
        let mime_type = request.mime_type.trim().to_string();
        validate_mime_type(&mime_type)?;
        let tags = normalize_tags(request.tags)?;
        validate_custom_metadata(&request.custom_metadata)?;
        let checksum = parse_checksum(&request.checksum)?;
        if request.file_size > self.config.max_upload_size_bytes {
            return Err(AppError::FileTooLarge {
                size: request.file_size,
                max: self.config.max_upload_size_bytes,
            });
        }

        let organization_id = request.organization_id;
        let project_id = request.project_id;
        if !self.policy.can_upload(caller, organization_id) {
            return Err(AppError::AccessDenied(format!(
                "caller may not upload to organization {}",
                organization_id
            )));
        }
        if !self.directory.organization_exists(organization_id).await? {
            return Err(AppError::ReferenceNotFound(format!(
                "organization {}",
                organization_id
            )));
        }
        if !self
            .directory
            .project_in_organization(organization_id, project_id)
            .await?
        {
            return Err(AppError::ReferenceNotFound(format!(
                "project {} in organization {}",
                project_id, organization_id
            )));
        }

        if let Some(existing) = self
            .assets
            .find_active_by_checksum(organization_id, &checksum)
            .await?
        {
            tracing::info!(existing_id = %existing.id, "Upload rejected as duplicate");
            return Err(AppError::DuplicateAsset {
                existing_id: existing.id,
            });
        }

        let asset_id = Uuid::new_v4();
        let storage_key = original_key(organization_id, project_id, asset_id, 1, &request.filename);
        let now = Utc::now();
        let expires_at = now + chrono_duration(self.config.upload_url_expiry)?;

        let asset = lifecycle::new_upload(
            NewUpload {
                id: asset_id,
                organization_id,
                project_id,
                uploader_id: caller.user_id,
                original_filename: request.filename,
                mime_type,
                file_size: request.file_size,
                checksum,
                tags,
                custom_metadata: request.custom_metadata,
                access_level: request.access_level,
                storage_provider: self.storage.provider(),
                storage_key: storage_key.clone(),
                upload_expires_at: expires_at,
            },
            now,
        );
        // A concurrent upload of the same content loses here with DUPLICATE_ASSET
        let asset = self.assets.insert_asset(&asset).await?;

        let presigned = self
            .storage
            .presigned_put_url(&storage_key, &asset.mime_type, self.config.upload_url_expiry)
            .await?;

        tracing::info!(
            asset_id = %asset.id,
            storage_key = %storage_key,
            expires_at = %expires_at,
            "Upload registered"
        );

        Ok(UploadTicket {
            asset_id: asset.id,
            upload_url: presigned.url,
            storage_key,
            expires_at,
        })
    }

    /// Verify the uploaded content and queue ingestion.
    ///
    /// Repeating a successful call with the same checksum and size returns
    /// the current snapshot and queues nothing.
    #[tracing::instrument(skip(self, request, caller), fields(user_id = %caller.user_id))]
    pub async fn finalize_upload(
        &self,
        asset_id: Uuid,
        request: FinalizeUploadRequest,
        caller: &Caller,
    ) -> Result<Asset, AppError> {
        validate_request(&request)?;
        let checksum = parse_checksum(&request.checksum)?;
        let max_size = self.config.max_upload_size_bytes;

        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_finalize(caller, asset), "finalize")?;
                Ok(
                    match lifecycle::finalize(asset, &checksum, request.size, max_size, Utc::now())? {
                        FinalizeDecision::AlreadyFinalized => Plan::Keep,
                        FinalizeDecision::Commit(transition) => Plan::Commit(transition),
                        FinalizeDecision::Reject { transition, error } => {
                            Plan::Reject(transition, error)
                        }
                    },
                )
            })
            .await?;

        if let Some(job) = applied.enqueued.first() {
            tracing::info!(job_id = %job.id, "Upload finalized, ingest queued");
        }
        Ok(applied.asset)
    }

    /// Apply a job's final outcome to its asset and finish the job.
    ///
    /// Outcomes for jobs that are already terminal are ignored.
    #[tracing::instrument(skip(self, outcome))]
    pub async fn apply_processing_result(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<(), AppError> {
        for attempt in 1..=self.config.commit_attempts {
            let job = self
                .jobs
                .get_job(job_id)
                .await?
                .ok_or(AppError::JobNotFound(job_id))?;
            if job.is_terminal() {
                tracing::debug!(job_id = %job_id, state = %job.state, "Job already finished, result ignored");
                return Ok(());
            }
            let asset = self.load(job.asset_id).await?;
            let transition = lifecycle::apply_job_result(&asset, &job, outcome.clone(), Utc::now());
            transition.check_edges(asset.status)?;

            match self.assets.commit(transition).await {
                Ok(committed) => {
                    tracing::info!(
                        job_id = %job_id,
                        job.kind = %job.kind,
                        asset_id = %asset.id,
                        asset_status = ?committed.asset.as_ref().map(|a| a.status),
                        enqueued = committed.enqueued.len(),
                        "Job result applied"
                    );
                    return Ok(());
                }
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(job_id = %job_id, attempt, reason = %reason, "Conflict applying job result, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(exhausted(job_id))
    }

    /// Move a pending asset to `processing` when its ingest job starts.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, asset_id = %job.asset_id))]
    pub async fn begin_processing(&self, job: &ProcessingJob) -> Result<(), AppError> {
        self.mutate(job.asset_id, |asset| {
            Ok(match lifecycle::begin_processing(asset, job, Utc::now()) {
                Some(transition) => Plan::Commit(transition),
                None => Plan::Keep,
            })
        })
        .await
        .map(|_| ())
    }

    /// `failed -> pending` with a fresh ingest job.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn retry_processing(&self, asset_id: Uuid, caller: &Caller) -> Result<Asset, AppError> {
        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_finalize(caller, asset), "retry")?;
                Ok(Plan::Commit(lifecycle::retry(asset, Utc::now())?))
            })
            .await?;
        tracing::info!(asset_id = %asset_id, "Processing retry queued");
        Ok(applied.asset)
    }

    /// Append a version and return where to upload its content.
    #[tracing::instrument(skip(self, request, caller), fields(user_id = %caller.user_id))]
    pub async fn add_version(
        &self,
        asset_id: Uuid,
        request: AddVersionRequest,
        caller: &Caller,
    ) -> Result<VersionTicket, AppError> {
        validate_request(&request)?;
        validate_filename(&request.filename)?;
        let max_size = self.config.max_upload_size_bytes;

        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_edit_metadata(caller, asset), "add versions to")?;
                let storage_key = original_key(
                    asset.organization_id,
                    asset.project_id,
                    asset.id,
                    asset.versions.next_number(),
                    &request.filename,
                );
                let (transition, _) = lifecycle::add_version(
                    asset,
                    storage_key,
                    request.file_size,
                    caller.user_id,
                    max_size,
                    Utc::now(),
                )?;
                Ok(Plan::Commit(transition))
            })
            .await?;

        let latest = applied.asset.versions.latest();
        let presigned = self
            .storage
            .presigned_put_url(
                &latest.storage_key,
                &applied.asset.mime_type,
                self.config.upload_url_expiry,
            )
            .await?;

        tracing::info!(
            asset_id = %asset_id,
            version = latest.version,
            storage_key = %latest.storage_key,
            "Version added"
        );

        Ok(VersionTicket {
            asset_id,
            version: latest.version,
            upload_url: presigned.url,
            storage_key: latest.storage_key.clone(),
            expires_at: presigned.expires_at,
        })
    }

    /// Mark the asset deleted and queue removal of everything it stored.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn soft_delete(&self, asset_id: Uuid, caller: &Caller) -> Result<(), AppError> {
        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_delete(caller, asset), "delete")?;
                Ok(Plan::Commit(lifecycle::soft_delete(asset, Utc::now())?))
            })
            .await?;
        tracing::info!(
            asset_id = %asset_id,
            cleanup_jobs = applied.enqueued.len(),
            "Asset deleted"
        );
        Ok(())
    }

    /// Snapshot of an asset. Counts as a view.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_asset(&self, asset_id: Uuid, caller: &Caller) -> Result<Asset, AppError> {
        let asset = self.load(asset_id).await?;
        authorize(&asset, self.policy.can_view(caller, &asset), "view")?;
        self.count(asset_id, Counter::Views).await;
        Ok(asset)
    }

    /// Non-deleted assets of the caller's organization the caller may see.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn list_assets(
        &self,
        filter: AssetFilter,
        caller: &Caller,
    ) -> Result<Vec<Asset>, AppError> {
        if caller.organization_id != filter.organization_id {
            return Err(AppError::AccessDenied(format!(
                "caller may not list assets of organization {}",
                filter.organization_id
            )));
        }
        let assets = self.assets.list_assets(&filter).await?;
        Ok(assets
            .into_iter()
            .filter(|asset| self.policy.can_view(caller, asset))
            .collect())
    }

    #[tracing::instrument(skip(self, request, caller), fields(user_id = %caller.user_id))]
    pub async fn update_descriptors(
        &self,
        asset_id: Uuid,
        request: UpdateDescriptorsRequest,
        caller: &Caller,
    ) -> Result<Asset, AppError> {
        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_edit_metadata(caller, asset), "edit")?;
                Ok(Plan::Commit(lifecycle::update_descriptors(
                    asset,
                    request.tags.clone(),
                    request.custom_metadata.clone(),
                    request.access_level,
                    Utc::now(),
                )?))
            })
            .await?;
        Ok(applied.asset)
    }

    /// Queue an auxiliary job, e.g. to regenerate renditions.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn reprocess(
        &self,
        asset_id: Uuid,
        kind: JobKind,
        caller: &Caller,
    ) -> Result<ProcessingJob, AppError> {
        let applied = self
            .mutate(asset_id, |asset| {
                authorize(asset, self.policy.can_edit_metadata(caller, asset), "reprocess")?;
                Ok(Plan::Commit(lifecycle::reprocess(asset, kind, Utc::now())?))
            })
            .await?;
        let job = applied
            .enqueued
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("reprocess committed without a job".to_string()))?;
        tracing::info!(asset_id = %asset_id, job_id = %job.id, job.kind = %kind, "Reprocessing queued");
        Ok(job)
    }

    /// Presigned download URL for the newest uploaded version, a given
    /// version or a rendition. Counts as a download.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_download_url(
        &self,
        asset_id: Uuid,
        target: Option<DownloadTarget>,
        caller: &Caller,
    ) -> Result<DownloadTicket, AppError> {
        let asset = self.load(asset_id).await?;
        authorize(&asset, self.policy.can_view(caller, &asset), "download")?;
        let storage_key = match lifecycle::download_source(&asset, target)? {
            DownloadSource::Key(key) => key,
            DownloadSource::FirstUploaded(keys) => self.first_uploaded(asset_id, keys).await?,
        };
        let presigned = self
            .storage
            .presigned_get_url(&storage_key, self.config.download_url_expiry)
            .await?;
        self.count(asset_id, Counter::Downloads).await;
        Ok(DownloadTicket {
            url: presigned.url,
            storage_key,
            expires_at: presigned.expires_at,
        })
    }

    pub async fn get_job(&self, job_id: Uuid, caller: &Caller) -> Result<ProcessingJob, AppError> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or(AppError::JobNotFound(job_id))?;
        let asset = self.load(job.asset_id).await?;
        if !self.policy.can_view(caller, &asset) {
            return Err(AppError::AccessDenied(format!(
                "caller may not view job {}",
                job_id
            )));
        }
        Ok(job)
    }

    /// Job history of an asset, oldest first.
    pub async fn list_jobs_for_asset(
        &self,
        asset_id: Uuid,
        caller: &Caller,
    ) -> Result<Vec<ProcessingJob>, AppError> {
        let asset = self.load(asset_id).await?;
        authorize(&asset, self.policy.can_view(caller, &asset), "view")?;
        Ok(self.jobs.list_jobs_for_asset(asset_id).await?)
    }

    pub async fn job_stats(&self, kind: Option<JobKind>) -> Result<JobStats, AppError> {
        Ok(self.jobs.stats(kind).await?)
    }

    /// Delete completed and failed jobs that finished more than
    /// `older_than_days` ago.
    #[tracing::instrument(skip(self))]
    pub async fn purge_finished_jobs(&self, older_than_days: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days.max(0));
        let purged = self.jobs.purge_finished(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Finished jobs purged");
        }
        Ok(purged)
    }

    /// Fail uploads whose window closed before `now` without a finalize.
    #[tracing::instrument(skip(self))]
    pub async fn expire_uploads(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self
            .assets
            .find_expired_uploads(now, EXPIRED_UPLOAD_BATCH)
            .await?;
        let mut failed = 0;
        for asset in expired {
            let Some(transition) = lifecycle::expire_upload(&asset, now) else {
                continue;
            };
            if let Err(e) = transition.check_edges(asset.status) {
                tracing::warn!(asset_id = %asset.id, error = %e, "Refusing to expire upload");
                continue;
            }
            match self.assets.commit(transition).await {
                Ok(_) => {
                    failed += 1;
                    tracing::info!(asset_id = %asset.id, "Upload window elapsed, asset failed");
                }
                // Finalized or deleted since the scan
                Err(StoreError::Conflict(_)) => {}
                Err(e) => {
                    tracing::warn!(asset_id = %asset.id, error = %e, "Failed to expire upload");
                }
            }
        }
        Ok(failed)
    }

    async fn first_uploaded(&self, asset_id: Uuid, keys: Vec<String>) -> Result<String, AppError> {
        for key in keys {
            if self.storage.exists(&key).await? {
                return Ok(key);
            }
        }
        Err(AppError::NotReady(format!(
            "no version of asset {} has been uploaded",
            asset_id
        )))
    }

    async fn load(&self, asset_id: Uuid) -> Result<Asset, AppError> {
        self.assets
            .get_asset(asset_id)
            .await?
            .ok_or(AppError::AssetNotFound(asset_id))
    }

    async fn count(&self, asset_id: Uuid, counter: Counter) {
        if let Err(e) = self.assets.increment_counter(asset_id, counter).await {
            tracing::warn!(asset_id = %asset_id, counter = ?counter, error = %e, "Failed to update counter");
        }
    }

    /// Plan against a fresh snapshot and commit, re-planning on revision
    /// conflicts.
    async fn mutate<F>(&self, asset_id: Uuid, mut plan: F) -> Result<Applied, AppError>
    where
        F: FnMut(&Asset) -> Result<Plan, AppError> + Send,
    {
        for attempt in 1..=self.config.commit_attempts {
            let snapshot = self.load(asset_id).await?;
            let (transition, rejection) = match plan(&snapshot)? {
                Plan::Keep => {
                    return Ok(Applied {
                        asset: snapshot,
                        enqueued: Vec::new(),
                    })
                }
                Plan::Commit(transition) => (transition, None),
                Plan::Reject(transition, error) => (transition, Some(error)),
            };
            transition.check_edges(snapshot.status)?;

            match self.assets.commit(transition).await {
                Ok(committed) => {
                    if let Some(error) = rejection {
                        tracing::warn!(asset_id = %asset_id, error = %error, "Asset rejected");
                        return Err(error);
                    }
                    return Ok(Applied {
                        asset: committed.asset.unwrap_or(snapshot),
                        enqueued: committed.enqueued,
                    });
                }
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(
                        asset_id = %asset_id,
                        attempt,
                        reason = %reason,
                        "Revision conflict, re-reading asset"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(exhausted(asset_id))
    }
}

/// Deleted assets are reported as missing before any permission check.
fn authorize(asset: &Asset, allowed: bool, action: &str) -> Result<(), AppError> {
    if asset.is_deleted() {
        return Err(AppError::AssetNotFound(asset.id));
    }
    if !allowed {
        return Err(AppError::AccessDenied(format!(
            "caller may not {} asset {}",
            action, asset.id
        )));
    }
    Ok(())
}

fn parse_checksum(value: &str) -> Result<Checksum, AppError> {
    value
        .parse()
        .map_err(|e: anyhow::Error| AppError::InvalidInput(format!("Invalid checksum: {}", e)))
}

fn chrono_duration(duration: Duration) -> Result<chrono::Duration, AppError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| AppError::Internal(format!("Invalid duration: {}", e)))
}

fn exhausted(id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "{} was modified concurrently too many times, try again",
        id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::models::{AssetStatus, CustomMetadata};
    use assetflow_core::ErrorMetadata;

    #[test]
    fn test_default_config() {
        let config = AssetServiceConfig::default();
        assert_eq!(config.upload_url_expiry, Duration::from_secs(3600));
        assert_eq!(config.download_url_expiry, Duration::from_secs(900));
        assert_eq!(config.commit_attempts, DEFAULT_COMMIT_ATTEMPTS);
    }

    #[test]
    fn test_parse_checksum_reports_invalid_input() {
        let err = parse_checksum("crc32:abcd").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_authorize_hides_deleted_assets() {
        let now = Utc::now();
        let org = Uuid::new_v4();
        let mut asset = lifecycle::new_upload(
            NewUpload {
                id: Uuid::new_v4(),
                organization_id: org,
                project_id: Uuid::new_v4(),
                uploader_id: Uuid::new_v4(),
                original_filename: "a.png".to_string(),
                mime_type: "image/png".to_string(),
                file_size: 10,
                checksum: Checksum::sha256_of(b"a"),
                tags: vec![],
                custom_metadata: CustomMetadata::new(),
                access_level: Default::default(),
                storage_provider: assetflow_core::models::StorageProvider::Local,
                storage_key: "k".to_string(),
                upload_expires_at: now,
            },
            now,
        );
        assert_eq!(asset.status, AssetStatus::Uploading);

        let err = authorize(&asset, false, "delete").unwrap_err();
        assert_eq!(err.error_code(), "ACCESS_DENIED");
        assert!(authorize(&asset, true, "delete").is_ok());

        asset.deleted_at = Some(now);
        let err = authorize(&asset, false, "delete").unwrap_err();
        assert_eq!(err.error_code(), "ASSET_NOT_FOUND");
    }
}
