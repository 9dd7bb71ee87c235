//! Persistence traits for assets and processing jobs
//!
//! Both backends implement the same contract:
//!
//! - at most one non-deleted asset per `(organization_id, checksum)`
//! - the version ledger only ever grows
//! - a [`Transition`] is applied all-or-nothing: the asset row (guarded by its
//!   `revision`), the job it finishes and the jobs it enqueues

use assetflow_core::models::{
    Asset, AssetStatus, Checksum, JobFinish, JobKind, JobLogEntry, JobLogLevel, JobState,
    ProcessingJob, VersionLedger,
};
use assetflow_core::Transition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Filter for asset listings. Deleted assets are never listed.
#[derive(Debug, Clone)]
pub struct AssetFilter {
    pub organization_id: Uuid,
    pub project_id: Option<Uuid>,
    pub status: Option<AssetStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl AssetFilter {
    pub fn for_organization(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            project_id: None,
            status: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }

    /// Limit clamped to `1..=MAX_LIST_LIMIT`, offset to non-negative.
    pub fn bounds(&self) -> (i64, i64) {
        (self.limit.clamp(1, MAX_LIST_LIMIT), self.offset.max(0))
    }

    pub(crate) fn matches(&self, asset: &Asset) -> bool {
        !asset.is_deleted()
            && asset.organization_id == self.organization_id
            && self.project_id.map_or(true, |p| asset.project_id == p)
            && self.status.map_or(true, |s| asset.status == s)
    }
}

/// Analytics counters, incremented outside the revision check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Views,
    Downloads,
}

impl Counter {
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Views => "view_count",
            Counter::Downloads => "download_count",
        }
    }
}

/// What a commit wrote.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// Stored asset with its new revision, when the transition changed it
    pub asset: Option<Asset>,
    pub enqueued: Vec<ProcessingJob>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: i64,
    pub queued: i64,
    pub active: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
}

impl JobStats {
    pub(crate) fn count(&mut self, state: JobState) {
        self.total += 1;
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Active => self.active += 1,
            JobState::Retrying => self.retrying += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Insert a freshly created asset.
    ///
    /// Fails with `Duplicate` when a non-deleted asset of the same organization
    /// already carries the checksum, including when a concurrent insert wins.
    async fn insert_asset(&self, asset: &Asset) -> StoreResult<Asset>;

    /// Fetch an asset, deleted or not.
    async fn get_asset(&self, asset_id: Uuid) -> StoreResult<Option<Asset>>;

    async fn find_active_by_checksum(
        &self,
        organization_id: Uuid,
        checksum: &Checksum,
    ) -> StoreResult<Option<Asset>>;

    /// Non-deleted assets matching `filter`, newest first.
    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>>;

    /// Apply a transition atomically.
    ///
    /// The asset is written only if the stored revision still equals the
    /// snapshot's revision; the finished job must not already be terminal.
    /// Either violation yields `Conflict` and nothing is written.
    async fn commit(&self, transition: Transition) -> StoreResult<Committed>;

    async fn increment_counter(&self, asset_id: Uuid, counter: Counter) -> StoreResult<()>;

    /// Non-deleted `uploading` assets whose upload window closed before `now`.
    async fn find_expired_uploads(&self, now: DateTime<Utc>, limit: i64)
        -> StoreResult<Vec<Asset>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<ProcessingJob>>;

    /// Job history of an asset, oldest first.
    async fn list_jobs_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<ProcessingJob>>;

    /// Claim the most urgent runnable job: highest priority, then earliest
    /// `run_at`. The claimed job is `active`, owned by `worker_id` and has one
    /// more attempt recorded.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ProcessingJob>>;

    /// Put a claimed job back without counting the attempt.
    async fn release(&self, job_id: Uuid) -> StoreResult<()>;

    /// Move an `active` job to `retrying`, runnable again at `run_at`.
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        entry: JobLogEntry,
    ) -> StoreResult<ProcessingJob>;

    async fn append_log(&self, job_id: Uuid, entry: JobLogEntry) -> StoreResult<()>;

    /// `active` jobs started before `started_before`.
    async fn find_stale(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>>;

    /// Delete terminal jobs finished before `finished_before`; returns the count.
    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> StoreResult<u64>;

    async fn stats(&self, kind: Option<JobKind>) -> StoreResult<JobStats>;
}

/// True when `next` keeps every stored version and only appends after them.
///
/// Timestamps are left out: the database truncates them to microseconds.
pub(crate) fn ledger_extends(stored: &VersionLedger, next: &VersionLedger) -> bool {
    stored.len() <= next.len()
        && stored.iter().zip(next.iter()).all(|(a, b)| {
            a.version == b.version
                && a.storage_key == b.storage_key
                && a.size == b.size
                && a.created_by == b.created_by
        })
}

/// Record a terminal state on a job.
pub(crate) fn apply_finish(job: &mut ProcessingJob, finish: &JobFinish) {
    job.state = finish.state;
    job.error = finish.error.clone();
    job.completed_at = Some(finish.finished_at);
    job.duration_ms = job
        .started_at
        .map(|started| (finish.finished_at - started).num_milliseconds().max(0));
    let entry = match &finish.error {
        Some(error) => JobLogEntry {
            at: finish.finished_at,
            level: JobLogLevel::Error,
            message: format!("failed: {}: {}", error.name, error.message),
        },
        None => JobLogEntry {
            at: finish.finished_at,
            level: JobLogLevel::Info,
            message: "completed".to_string(),
        },
    };
    job.logs.push(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::models::{JobError, JobPayload, NewJob, Priority};

    #[test]
    fn test_filter_bounds_are_clamped() {
        let mut filter = AssetFilter::for_organization(Uuid::new_v4());
        filter.limit = 0;
        filter.offset = -5;
        assert_eq!(filter.bounds(), (1, 0));
        filter.limit = 50_000;
        assert_eq!(filter.bounds(), (MAX_LIST_LIMIT, 0));
    }

    #[test]
    fn test_ledger_extends() {
        let by = Uuid::new_v4();
        let stored = VersionLedger::first("k1".to_string(), 10, by, Utc::now());
        let mut next = stored.clone();
        next.append("k2".to_string(), 20, by, Utc::now());
        assert!(ledger_extends(&stored, &next));
        assert!(!ledger_extends(&next, &stored));

        let rewritten = VersionLedger::first("other".to_string(), 10, by, Utc::now());
        assert!(!ledger_extends(&stored, &rewritten));
    }

    #[test]
    fn test_apply_finish_records_duration_and_log() {
        let now = Utc::now();
        let mut job = NewJob {
            id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            kind: JobKind::Ingest,
            priority: Priority::High,
            payload: JobPayload::Asset,
            max_attempts: 5,
            lineage_id: Uuid::new_v4(),
            run_at: now,
        }
        .into_job(now);
        job.state = JobState::Active;
        job.started_at = Some(now);

        let error = JobError {
            name: "DECODE_FAILED".to_string(),
            message: "bad header".to_string(),
            stack: None,
        };
        let finish = JobFinish::failed(job.id, error, now + chrono::Duration::milliseconds(1500));
        apply_finish(&mut job, &finish);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.duration_ms, Some(1500));
        assert!(job.logs.last().unwrap().message.contains("DECODE_FAILED"));
    }
}
