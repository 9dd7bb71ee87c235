//! Asset lifecycle state machine
//!
//! Every function here takes an immutable snapshot of an asset and returns the
//! next snapshot together with the side effects the store must apply in the
//! same atomic commit: jobs to enqueue and the job being finished. Nothing in
//! this module performs I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, ErrorMetadata};
use crate::models::{
    AccessLevel, Asset, AssetStatus, AssetType, Checksum, CustomMetadata, ExtractedMetadata,
    JobFinish, JobKind, JobOutcome, NewJob, ProcessingError, ProcessingJob, RenditionKind,
    RenditionSet, StorageProvider, VersionLedger,
};
use crate::validation::{normalize_tags, validate_custom_metadata};

/// Next state plus the side effects committed with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// `None` when the asset row is left untouched
    pub asset: Option<Asset>,
    /// Status the asset passes through inside this commit
    pub via: Option<AssetStatus>,
    pub enqueue: Vec<NewJob>,
    pub finish_job: Option<JobFinish>,
}

impl Transition {
    fn update(asset: Asset) -> Self {
        Self {
            asset: Some(asset),
            via: None,
            enqueue: Vec::new(),
            finish_job: None,
        }
    }

    fn untouched() -> Self {
        Self {
            asset: None,
            via: None,
            enqueue: Vec::new(),
            finish_job: None,
        }
    }

    /// Leaves the asset row untouched and only finishes `finish`.
    pub fn finish_only(finish: JobFinish) -> Self {
        Self::untouched().finishing(finish)
    }

    fn passing_through(mut self, status: AssetStatus) -> Self {
        self.via = Some(status);
        self
    }

    /// Check every status edge taken from `from` against the lifecycle graph.
    pub fn check_edges(&self, from: AssetStatus) -> Result<(), AppError> {
        let Some(next) = &self.asset else {
            return Ok(());
        };
        let mut current = from;
        for step in self.via.into_iter().chain(std::iter::once(next.status)) {
            if step != current && !current.can_transition_to(step) {
                return Err(AppError::InvalidState(format!(
                    "asset {} cannot move from {} to {}",
                    next.id, current, step
                )));
            }
            current = step;
        }
        Ok(())
    }

    fn enqueue(mut self, job: NewJob) -> Self {
        self.enqueue.push(job);
        self
    }

    fn finishing(mut self, finish: JobFinish) -> Self {
        self.finish_job = Some(finish);
        self
    }
}

/// Outcome of a finalize attempt.
#[derive(Debug)]
pub enum FinalizeDecision {
    /// Already verified earlier; return the snapshot as is
    AlreadyFinalized,
    /// Verified: commit and report success
    Commit(Transition),
    /// Verification failed: commit the failed asset, then report `error`
    Reject {
        transition: Transition,
        error: AppError,
    },
}

/// Inputs of a new upload, already validated by the caller.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub uploader_id: Uuid,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub checksum: Checksum,
    pub tags: Vec<String>,
    pub custom_metadata: CustomMetadata,
    pub access_level: AccessLevel,
    pub storage_provider: StorageProvider,
    pub storage_key: String,
    pub upload_expires_at: DateTime<Utc>,
}

/// Asset in `uploading` with version 1 pre-registered.
pub fn new_upload(upload: NewUpload, now: DateTime<Utc>) -> Asset {
    let versions = VersionLedger::first(
        upload.storage_key.clone(),
        upload.file_size,
        upload.uploader_id,
        now,
    );
    Asset {
        id: upload.id,
        organization_id: upload.organization_id,
        project_id: upload.project_id,
        uploader_id: upload.uploader_id,
        asset_type: AssetType::from_mime(&upload.mime_type),
        original_filename: upload.original_filename,
        mime_type: upload.mime_type,
        file_size: upload.file_size,
        checksum: upload.checksum,
        status: AssetStatus::Uploading,
        storage_provider: upload.storage_provider,
        storage_key: upload.storage_key,
        versions,
        renditions: RenditionSet::new(),
        tags: upload.tags,
        metadata: ExtractedMetadata::default(),
        custom_metadata: upload.custom_metadata,
        access_level: upload.access_level,
        view_count: 0,
        download_count: 0,
        processing_error: None,
        upload_expires_at: Some(upload.upload_expires_at),
        deleted_at: None,
        revision: 0,
        created_at: now,
        updated_at: now,
    }
}

fn ensure_live(asset: &Asset) -> Result<(), AppError> {
    if asset.is_deleted() {
        return Err(AppError::AssetNotFound(asset.id));
    }
    Ok(())
}

fn failed_with(
    asset: &Asset,
    code: &str,
    message: String,
    job_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Asset {
    let mut next = asset.clone();
    next.status = AssetStatus::Failed;
    next.processing_error = Some(ProcessingError {
        code: code.to_string(),
        message,
        job_id,
        occurred_at: now,
    });
    next.updated_at = now;
    next
}

/// A failure recorded at finalize rather than by a job.
fn failed_at_finalize(asset: &Asset) -> Option<&ProcessingError> {
    match (&asset.status, &asset.processing_error) {
        (AssetStatus::Failed, Some(err)) if err.job_id.is_none() => Some(err),
        _ => None,
    }
}

/// Verify an upload and move it to `pending` with an ingest job.
pub fn finalize(
    asset: &Asset,
    actual_checksum: &Checksum,
    actual_size: i64,
    max_size: i64,
    now: DateTime<Utc>,
) -> Result<FinalizeDecision, AppError> {
    ensure_live(asset)?;

    if asset.status != AssetStatus::Uploading {
        if let Some(err) = failed_at_finalize(asset) {
            return Err(match err.code.as_str() {
                "UPLOAD_URL_EXPIRED" => AppError::UploadUrlExpired(asset.id),
                _ => AppError::InvalidState(format!(
                    "asset failed verification at finalize ({})",
                    err.code
                )),
            });
        }
        if &asset.checksum == actual_checksum && asset.file_size == actual_size {
            return Ok(FinalizeDecision::AlreadyFinalized);
        }
        return Err(AppError::InvalidState(format!(
            "asset is already {} and cannot be finalized with different content",
            asset.status
        )));
    }

    let reject = |error: AppError| {
        let failed = failed_with(asset, error.error_code(), error.to_string(), None, now);
        FinalizeDecision::Reject {
            transition: Transition::update(failed),
            error,
        }
    };

    if asset.upload_expired_at(now) {
        return Ok(reject(AppError::UploadUrlExpired(asset.id)));
    }
    if &asset.checksum != actual_checksum {
        return Ok(reject(AppError::ChecksumMismatch {
            expected: asset.checksum.to_string(),
            actual: actual_checksum.to_string(),
        }));
    }
    if actual_size > max_size {
        return Ok(reject(AppError::FileTooLarge {
            size: actual_size,
            max: max_size,
        }));
    }
    if actual_size != asset.file_size {
        return Ok(reject(AppError::SizeMismatch {
            declared: asset.file_size,
            actual: actual_size,
        }));
    }

    let mut next = asset.clone();
    next.status = AssetStatus::Pending;
    next.updated_at = now;
    let ingest = NewJob::for_asset(&next, JobKind::Ingest, now);
    Ok(FinalizeDecision::Commit(
        Transition::update(next).enqueue(ingest),
    ))
}

/// `pending -> processing` when a worker picks up the ingest job.
pub fn begin_processing(asset: &Asset, job: &ProcessingJob, now: DateTime<Utc>) -> Option<Transition> {
    if job.kind != JobKind::Ingest || asset.is_deleted() || asset.status != AssetStatus::Pending {
        return None;
    }
    let mut next = asset.clone();
    next.status = AssetStatus::Processing;
    next.updated_at = now;
    Some(Transition::update(next))
}

/// Apply the final outcome of a job to its asset.
///
/// The job is always finished by the returned transition. The asset changes
/// only when the outcome is still relevant to its current status, so a job
/// can move an asset to `failed` at most once and a `failed` asset is never
/// revived by a late success.
pub fn apply_job_result(
    asset: &Asset,
    job: &ProcessingJob,
    outcome: JobOutcome,
    now: DateTime<Utc>,
) -> Transition {
    match outcome {
        JobOutcome::Succeeded(artifacts) => {
            let finish = JobFinish::completed(job.id, now);

            if asset.is_deleted() {
                // Anything written after deletion is orphaned
                let orphans: Vec<String> = artifacts
                    .renditions
                    .storage_keys()
                    .map(str::to_string)
                    .collect();
                let transition = Transition::untouched().finishing(finish);
                return if orphans.is_empty() {
                    transition
                } else {
                    transition.enqueue(NewJob::cleanup(asset, orphans, now))
                };
            }

            let advance = match (job.kind, asset.status) {
                (JobKind::Cleanup, _) => None,
                (JobKind::Ingest, AssetStatus::Pending | AssetStatus::Processing) => {
                    Some(AssetStatus::Completed)
                }
                (JobKind::Ingest, _) => None,
                (_, AssetStatus::Failed | AssetStatus::Uploading) => None,
                (_, status) => Some(status),
            };

            match advance {
                Some(status) => {
                    let mut next = asset.clone();
                    next.metadata.merge(artifacts.metadata);
                    next.renditions.merge(artifacts.renditions);
                    next.status = status;
                    next.processing_error = None;
                    next.updated_at = now;
                    // Videos get their preview from a separate low-priority job
                    let transcode = (job.kind == JobKind::Ingest
                        && next.asset_type == AssetType::Video
                        && next.renditions.get(RenditionKind::Preview720p).is_none())
                    .then(|| NewJob::for_asset(&next, JobKind::Transcode, now));
                    let mut transition = Transition::update(next).finishing(finish);
                    // The start notification was lost; record the skipped step
                    if asset.status == AssetStatus::Pending && status == AssetStatus::Completed {
                        transition = transition.passing_through(AssetStatus::Processing);
                    }
                    match transcode {
                        Some(job) => transition.enqueue(job),
                        None => transition,
                    }
                }
                None => Transition::untouched().finishing(finish),
            }
        }
        JobOutcome::Failed { code, error } => {
            let message = error.message.clone();
            let finish = JobFinish::failed(job.id, error, now);

            if asset.is_deleted() || job.kind == JobKind::Cleanup {
                return Transition::untouched().finishing(finish);
            }

            match (job.kind, asset.status) {
                (JobKind::Ingest, AssetStatus::Pending | AssetStatus::Processing) => {
                    Transition::update(failed_with(asset, &code, message, Some(job.id), now))
                        .finishing(finish)
                }
                (kind, AssetStatus::Completed | AssetStatus::Pending | AssetStatus::Processing)
                    if kind.is_auxiliary() =>
                {
                    let mut next = asset.clone();
                    next.processing_error = Some(ProcessingError {
                        code,
                        message,
                        job_id: Some(job.id),
                        occurred_at: now,
                    });
                    next.updated_at = now;
                    Transition::update(next).finishing(finish)
                }
                _ => Transition::untouched().finishing(finish),
            }
        }
    }
}

/// `failed -> pending` with a fresh ingest job.
pub fn retry(asset: &Asset, now: DateTime<Utc>) -> Result<Transition, AppError> {
    ensure_live(asset)?;
    if asset.status != AssetStatus::Failed {
        return Err(AppError::InvalidState(format!(
            "only failed assets can be retried, asset is {}",
            asset.status
        )));
    }
    if let Some(err) = failed_at_finalize(asset) {
        return Err(AppError::InvalidState(format!(
            "asset failed verification at finalize ({}); create a new upload",
            err.code
        )));
    }
    let mut next = asset.clone();
    next.status = AssetStatus::Pending;
    next.processing_error = None;
    next.updated_at = now;
    let ingest = NewJob::for_asset(&next, JobKind::Ingest, now);
    Ok(Transition::update(next).enqueue(ingest))
}

/// Append version n+1 stored at `storage_key`. Returns the new version number.
pub fn add_version(
    asset: &Asset,
    storage_key: String,
    size: i64,
    created_by: Uuid,
    max_size: i64,
    now: DateTime<Utc>,
) -> Result<(Transition, i32), AppError> {
    ensure_live(asset)?;
    if !matches!(asset.status, AssetStatus::Pending | AssetStatus::Completed) {
        return Err(AppError::InvalidState(format!(
            "versions can only be added to pending or completed assets, asset is {}",
            asset.status
        )));
    }
    if size <= 0 {
        return Err(AppError::InvalidInput("size must be positive".to_string()));
    }
    if size > max_size {
        return Err(AppError::FileTooLarge {
            size,
            max: max_size,
        });
    }
    let mut next = asset.clone();
    let version = next.versions.append(storage_key, size, created_by, now).version;
    next.updated_at = now;
    Ok((Transition::update(next), version))
}

/// Mark deleted and enqueue removal of every object the asset owns.
pub fn soft_delete(asset: &Asset, now: DateTime<Utc>) -> Result<Transition, AppError> {
    ensure_live(asset)?;
    let mut next = asset.clone();
    next.deleted_at = Some(now);
    next.updated_at = now;
    let cleanup = NewJob::cleanup(&next, asset.all_storage_keys(), now);
    Ok(Transition::update(next).enqueue(cleanup))
}

/// Replace the caller-editable descriptors that are given.
pub fn update_descriptors(
    asset: &Asset,
    tags: Option<Vec<String>>,
    custom_metadata: Option<CustomMetadata>,
    access_level: Option<AccessLevel>,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    ensure_live(asset)?;
    let mut next = asset.clone();
    if let Some(tags) = tags {
        next.tags = normalize_tags(tags)?;
    }
    if let Some(custom_metadata) = custom_metadata {
        validate_custom_metadata(&custom_metadata)?;
        next.custom_metadata = custom_metadata;
    }
    if let Some(access_level) = access_level {
        next.access_level = access_level;
    }
    next.updated_at = now;
    Ok(Transition::update(next))
}

/// Fail an upload whose window elapsed without a finalize.
pub fn expire_upload(asset: &Asset, now: DateTime<Utc>) -> Option<Transition> {
    if asset.is_deleted() || asset.status != AssetStatus::Uploading || !asset.upload_expired_at(now)
    {
        return None;
    }
    let error = AppError::UploadUrlExpired(asset.id);
    Some(Transition::update(failed_with(
        asset,
        error.error_code(),
        error.to_string(),
        None,
        now,
    )))
}

/// Enqueue an auxiliary job for a completed asset.
pub fn reprocess(asset: &Asset, kind: JobKind, now: DateTime<Utc>) -> Result<Transition, AppError> {
    ensure_live(asset)?;
    if !kind.is_auxiliary() {
        return Err(AppError::InvalidInput(format!(
            "{} jobs cannot be requested directly",
            kind
        )));
    }
    if asset.status != AssetStatus::Completed {
        return Err(AppError::InvalidState(format!(
            "only completed assets can be reprocessed, asset is {}",
            asset.status
        )));
    }
    let mut next = asset.clone();
    next.updated_at = now;
    let job = NewJob::for_asset(&next, kind, now);
    Ok(Transition::update(next).enqueue(job))
}

/// What a download request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTarget {
    Version(i32),
    Rendition(RenditionKind),
}

/// Where a download is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    Key(String),
    /// Version keys, newest first. Appended versions may not be uploaded
    /// yet, so the first one present in storage is served.
    FirstUploaded(Vec<String>),
}

/// Resolve a download request against the asset's versions and renditions.
pub fn download_source(
    asset: &Asset,
    target: Option<DownloadTarget>,
) -> Result<DownloadSource, AppError> {
    ensure_live(asset)?;
    if asset.status != AssetStatus::Completed {
        return Err(AppError::NotReady(format!(
            "asset {} is {}",
            asset.id, asset.status
        )));
    }
    match target {
        None => Ok(DownloadSource::FirstUploaded(
            asset
                .versions
                .newest_first()
                .map(|v| v.storage_key.clone())
                .collect(),
        )),
        Some(DownloadTarget::Version(version)) => asset
            .versions
            .get(version)
            .map(|v| DownloadSource::Key(v.storage_key.clone()))
            .ok_or_else(|| {
                AppError::InvalidInput(format!("asset {} has no version {}", asset.id, version))
            }),
        Some(DownloadTarget::Rendition(kind)) => asset
            .renditions
            .get(kind)
            .map(|r| DownloadSource::Key(r.storage_key.clone()))
            .ok_or_else(|| AppError::NotReady(format!("rendition {} not generated yet", kind))),
    }
}
