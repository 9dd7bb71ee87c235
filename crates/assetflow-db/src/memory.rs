//! In-memory asset and job store
//!
//! A single lock guards assets and jobs together so a commit is atomic in the
//! same way a database transaction is. Used with `STORE_BACKEND=memory` and by
//! the test suites.

use std::collections::HashMap;

use assetflow_core::models::{
    Asset, AssetStatus, Checksum, JobKind, JobLogEntry, JobLogLevel, JobState, ProcessingJob,
};
use assetflow_core::Transition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{
    apply_finish, ledger_extends, AssetFilter, AssetStore, Committed, Counter, JobStats,
    JobStore,
};

#[derive(Default)]
struct Tables {
    assets: HashMap<Uuid, Asset>,
    jobs: HashMap<Uuid, ProcessingJob>,
}

impl Tables {
    fn active_with_checksum(&self, organization_id: Uuid, checksum: &Checksum) -> Option<&Asset> {
        self.assets.values().find(|a| {
            !a.is_deleted() && a.organization_id == organization_id && &a.checksum == checksum
        })
    }

    fn job_mut(&mut self, job_id: Uuid) -> StoreResult<&mut ProcessingJob> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn insert_asset(&self, asset: &Asset) -> StoreResult<Asset> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.active_with_checksum(asset.organization_id, &asset.checksum)
        {
            return Err(StoreError::Duplicate {
                existing_id: existing.id,
            });
        }
        if tables.assets.contains_key(&asset.id) {
            return Err(StoreError::Conflict(format!("asset {} already exists", asset.id)));
        }
        tables.assets.insert(asset.id, asset.clone());
        Ok(asset.clone())
    }

    async fn get_asset(&self, asset_id: Uuid) -> StoreResult<Option<Asset>> {
        Ok(self.tables.lock().await.assets.get(&asset_id).cloned())
    }

    async fn find_active_by_checksum(
        &self,
        organization_id: Uuid,
        checksum: &Checksum,
    ) -> StoreResult<Option<Asset>> {
        Ok(self
            .tables
            .lock()
            .await
            .active_with_checksum(organization_id, checksum)
            .cloned())
    }

    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        let (limit, offset) = filter.bounds();
        let tables = self.tables.lock().await;
        let mut assets: Vec<Asset> = tables
            .assets
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(assets
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn commit(&self, transition: Transition) -> StoreResult<Committed> {
        let mut tables = self.tables.lock().await;

        // Validate everything before writing anything
        if let Some(finish) = &transition.finish_job {
            let job = tables
                .jobs
                .get(&finish.job_id)
                .ok_or_else(|| StoreError::NotFound(format!("job {}", finish.job_id)))?;
            if job.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "job {} is already {}",
                    job.id, job.state
                )));
            }
        }
        if let Some(next) = &transition.asset {
            let stored = tables
                .assets
                .get(&next.id)
                .ok_or_else(|| StoreError::NotFound(format!("asset {}", next.id)))?;
            if stored.revision != next.revision {
                return Err(StoreError::Conflict(format!(
                    "asset {} is at revision {}, update was based on {}",
                    next.id, stored.revision, next.revision
                )));
            }
            if !ledger_extends(&stored.versions, &next.versions) {
                return Err(StoreError::Conflict(format!(
                    "asset {} version ledger can only be appended to",
                    next.id
                )));
            }
            if !next.is_deleted() {
                if let Some(other) = tables.active_with_checksum(next.organization_id, &next.checksum)
                {
                    if other.id != next.id {
                        return Err(StoreError::Duplicate {
                            existing_id: other.id,
                        });
                    }
                }
            }
        }

        let now = Utc::now();
        if let Some(finish) = &transition.finish_job {
            let job = tables.job_mut(finish.job_id)?;
            apply_finish(job, finish);
        }

        let asset = transition.asset.map(|mut next| {
            // Analytics counters are not part of the snapshot
            if let Some(stored) = tables.assets.get(&next.id) {
                next.view_count = stored.view_count;
                next.download_count = stored.download_count;
            }
            next.revision += 1;
            tables.assets.insert(next.id, next.clone());
            next
        });

        let mut enqueued = Vec::with_capacity(transition.enqueue.len());
        for new_job in transition.enqueue {
            let job = new_job.into_job(now);
            tables.jobs.insert(job.id, job.clone());
            enqueued.push(job);
        }

        Ok(Committed { asset, enqueued })
    }

    async fn increment_counter(&self, asset_id: Uuid, counter: Counter) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let asset = tables
            .assets
            .get_mut(&asset_id)
            .ok_or_else(|| StoreError::NotFound(format!("asset {}", asset_id)))?;
        match counter {
            Counter::Views => asset.view_count += 1,
            Counter::Downloads => asset.download_count += 1,
        }
        Ok(())
    }

    async fn find_expired_uploads(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Asset>> {
        let tables = self.tables.lock().await;
        let mut expired: Vec<Asset> = tables
            .assets
            .values()
            .filter(|a| {
                !a.is_deleted() && a.status == AssetStatus::Uploading && a.upload_expired_at(now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.upload_expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        Ok(self.tables.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list_jobs_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<ProcessingJob>> {
        let tables = self.tables.lock().await;
        let mut jobs: Vec<ProcessingJob> = tables
            .jobs
            .values()
            .filter(|j| j.asset_id == asset_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.queued_at);
        Ok(jobs)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ProcessingJob>> {
        let mut tables = self.tables.lock().await;
        let next_id = tables
            .jobs
            .values()
            .filter(|j| j.is_ready_to_run(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.run_at.cmp(&b.run_at))
                    .then(a.queued_at.cmp(&b.queued_at))
            })
            .map(|j| j.id);

        let Some(job_id) = next_id else {
            return Ok(None);
        };
        let job = tables.job_mut(job_id)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.logs.push(JobLogEntry {
            at: now,
            level: JobLogLevel::Info,
            message: format!("attempt {} started by {}", job.attempts, worker_id),
        });
        Ok(Some(job.clone()))
    }

    async fn release(&self, job_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let job = tables.job_mut(job_id)?;
        if job.state == JobState::Active {
            job.state = JobState::Queued;
            job.attempts = (job.attempts - 1).max(0);
            job.worker_id = None;
            job.started_at = None;
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        entry: JobLogEntry,
    ) -> StoreResult<ProcessingJob> {
        let mut tables = self.tables.lock().await;
        let job = tables.job_mut(job_id)?;
        if job.state != JobState::Active {
            return Err(StoreError::Conflict(format!(
                "job {} is {}, not active",
                job_id, job.state
            )));
        }
        job.state = JobState::Retrying;
        job.run_at = run_at;
        job.worker_id = None;
        job.logs.push(entry);
        Ok(job.clone())
    }

    async fn append_log(&self, job_id: Uuid, entry: JobLogEntry) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.job_mut(job_id)?.logs.push(entry);
        Ok(())
    }

    async fn find_stale(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| {
                j.state == JobState::Active && j.started_at.is_some_and(|s| s < started_before)
            })
            .cloned()
            .collect())
    }

    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.jobs.len();
        tables.jobs.retain(|_, j| {
            !(j.is_terminal() && j.completed_at.is_some_and(|at| at < finished_before))
        });
        Ok((before - tables.jobs.len()) as u64)
    }

    async fn stats(&self, kind: Option<JobKind>) -> StoreResult<JobStats> {
        let tables = self.tables.lock().await;
        let mut stats = JobStats::default();
        for job in tables
            .jobs
            .values()
            .filter(|j| kind.map_or(true, |k| j.kind == k))
        {
            stats.count(job.state);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::lifecycle::{self, FinalizeDecision, NewUpload};
    use assetflow_core::models::{AccessLevel, CustomMetadata, JobOutcome, StorageProvider};
    use chrono::Duration;

    fn upload(organization_id: Uuid, checksum: &str) -> Asset {
        let now = Utc::now();
        lifecycle::new_upload(
            NewUpload {
                id: Uuid::new_v4(),
                organization_id,
                project_id: Uuid::new_v4(),
                uploader_id: Uuid::new_v4(),
                original_filename: "a.png".to_string(),
                mime_type: "image/png".to_string(),
                file_size: 10,
                checksum: checksum.parse().unwrap(),
                tags: vec![],
                custom_metadata: CustomMetadata::new(),
                access_level: AccessLevel::Private,
                storage_provider: StorageProvider::Local,
                storage_key: "k".to_string(),
                upload_expires_at: now + Duration::hours(1),
            },
            now,
        )
    }

    fn sha(n: u8) -> String {
        format!("sha256:{}", format!("{:02x}", n).repeat(32))
    }

    async fn finalized(store: &MemoryStore, asset: &Asset) -> Committed {
        match lifecycle::finalize(asset, &asset.checksum, 10, 1000, Utc::now()).unwrap() {
            FinalizeDecision::Commit(t) => store.commit(t).await.unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_checksum_rejected_until_deleted() {
        let store = MemoryStore::new();
        let org = Uuid::new_v4();
        let first = store.insert_asset(&upload(org, &sha(1))).await.unwrap();

        match store.insert_asset(&upload(org, &sha(1))).await {
            Err(StoreError::Duplicate { existing_id }) => assert_eq!(existing_id, first.id),
            other => panic!("expected duplicate, got {:?}", other.map(|a| a.id)),
        }
        // Other organizations are independent
        store.insert_asset(&upload(Uuid::new_v4(), &sha(1))).await.unwrap();

        let deleted = lifecycle::soft_delete(&first, Utc::now()).unwrap();
        store.commit(deleted).await.unwrap();
        store.insert_asset(&upload(org, &sha(1))).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_revision() {
        let store = MemoryStore::new();
        let asset = store.insert_asset(&upload(Uuid::new_v4(), &sha(2))).await.unwrap();

        let committed = finalized(&store, &asset).await;
        assert_eq!(committed.asset.as_ref().unwrap().revision, 1);
        assert_eq!(committed.enqueued.len(), 1);

        // A second finalize based on the old snapshot loses the race
        let stale = match lifecycle::finalize(&asset, &asset.checksum, 10, 1000, Utc::now())
            .unwrap()
        {
            FinalizeDecision::Commit(t) => t,
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(
            store.commit(stale).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.list_jobs_for_asset(asset.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_order_and_retry() {
        let store = MemoryStore::new();
        let asset = store.insert_asset(&upload(Uuid::new_v4(), &sha(3))).await.unwrap();
        let pending = finalized(&store, &asset).await.asset.unwrap();

        // Cleanup is delayed and lowest priority; ingest is claimed first
        let cleanup = lifecycle::soft_delete(&pending, Utc::now()).unwrap();
        store.commit(cleanup).await.unwrap();

        let now = Utc::now();
        let claimed = store.claim_next("w1", now).await.unwrap().unwrap();
        assert_eq!(claimed.kind, JobKind::Ingest);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.state, JobState::Active);
        assert!(store.claim_next("w1", now).await.unwrap().is_none());

        let retry_at = now + Duration::seconds(2);
        store
            .schedule_retry(claimed.id, retry_at, JobLogEntry::warn("transient"))
            .await
            .unwrap();
        assert!(store.claim_next("w1", now).await.unwrap().is_none());

        let again = store.claim_next("w2", retry_at).await.unwrap().unwrap();
        assert_eq!(again.id, claimed.id);
        assert_eq!(again.attempts, 2);
        assert_eq!(again.worker_id.as_deref(), Some("w2"));

        let cleanup_job = store
            .claim_next("w1", now + Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleanup_job.kind, JobKind::Cleanup);
    }

    #[tokio::test]
    async fn test_finishing_terminal_job_conflicts() {
        let store = MemoryStore::new();
        let asset = store.insert_asset(&upload(Uuid::new_v4(), &sha(4))).await.unwrap();
        let pending = finalized(&store, &asset).await.asset.unwrap();
        let job = store.claim_next("w", Utc::now()).await.unwrap().unwrap();

        let outcome = JobOutcome::Succeeded(Default::default());
        let done = lifecycle::apply_job_result(&pending, &job, outcome.clone(), Utc::now());
        let completed = store.commit(done).await.unwrap().asset.unwrap();
        assert_eq!(completed.status, AssetStatus::Completed);

        let again = lifecycle::apply_job_result(&completed, &job, outcome, Utc::now());
        assert!(matches!(
            store.commit(again).await,
            Err(StoreError::Conflict(_))
        ));

        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_counters_survive_commits() {
        let store = MemoryStore::new();
        let asset = store.insert_asset(&upload(Uuid::new_v4(), &sha(5))).await.unwrap();
        store.increment_counter(asset.id, Counter::Views).await.unwrap();
        store.increment_counter(asset.id, Counter::Views).await.unwrap();
        finalized(&store, &asset).await;

        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.view_count, 2);
        assert_eq!(stored.status, AssetStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_uploads_and_purge() {
        let store = MemoryStore::new();
        let asset = store.insert_asset(&upload(Uuid::new_v4(), &sha(6))).await.unwrap();
        let later = Utc::now() + Duration::hours(2);
        let expired = store.find_expired_uploads(later, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, asset.id);
        assert!(store
            .find_expired_uploads(Utc::now(), 10)
            .await
            .unwrap()
            .is_empty());

        let pending = finalized(&store, &asset).await.asset.unwrap();
        let job = store.claim_next("w", Utc::now()).await.unwrap().unwrap();
        let outcome = JobOutcome::Succeeded(Default::default());
        store
            .commit(lifecycle::apply_job_result(&pending, &job, outcome, Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.purge_finished(Utc::now() - Duration::days(1)).await.unwrap(), 0);
        assert_eq!(store.purge_finished(later).await.unwrap(), 1);
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }
}
