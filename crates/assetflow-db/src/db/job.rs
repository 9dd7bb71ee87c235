use assetflow_core::models::{JobKind, JobLogEntry, JobLogLevel, JobState, ProcessingJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::rows::{job_from_row, lock_job, update_job, JOB_COLUMNS};
use super::transaction::TransactionGuard;
use crate::error::{StoreError, StoreResult};
use crate::store::{JobStats, JobStore};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self))]
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM processing_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_jobs_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<ProcessingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM processing_jobs WHERE asset_id = $1 ORDER BY queued_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Claims across every organization: the worker pool is shared and the
    /// asset row carries the tenant.
    #[tracing::instrument(skip(self))]
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ProcessingJob>> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM processing_jobs
            WHERE state IN ('queued', 'retrying')
                AND run_at <= $1
            ORDER BY priority DESC, run_at ASC, queued_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
            JOB_COLUMNS
        ))
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut job = job_from_row(&row)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.logs.push(JobLogEntry {
            at: now,
            level: JobLogLevel::Info,
            message: format!("attempt {} started by {}", job.attempts, worker_id),
        });
        update_job(&mut **tx, &job).await?;
        tx.commit().await?;

        tracing::debug!(
            job.id = %job.id,
            job.kind = %job.kind,
            attempts = job.attempts,
            "Job claimed"
        );

        Ok(Some(job))
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, job_id: Uuid) -> StoreResult<()> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let mut job = lock_job(&mut **tx, job_id).await?;
        if job.state == JobState::Active {
            job.state = JobState::Queued;
            job.attempts = (job.attempts - 1).max(0);
            job.worker_id = None;
            job.started_at = None;
            update_job(&mut **tx, &job).await?;
        }
        tx.commit().await
    }

    #[tracing::instrument(skip(self, entry))]
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        entry: JobLogEntry,
    ) -> StoreResult<ProcessingJob> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let mut job = lock_job(&mut **tx, job_id).await?;
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
        update_job(&mut **tx, &job).await?;
        tx.commit().await?;

        tracing::info!(
            job.id = %job.id,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            run_at = %run_at,
            "Job retry scheduled"
        );

        Ok(job)
    }

    #[tracing::instrument(skip(self, entry))]
    async fn append_log(&self, job_id: Uuid, entry: JobLogEntry) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE processing_jobs SET logs = logs || jsonb_build_array($2::jsonb) WHERE id = $1",
        )
        .bind(job_id)
        .bind(sqlx::types::Json(&entry))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_stale(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM processing_jobs WHERE state = 'active' AND started_at < $1",
            JOB_COLUMNS
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn purge_finished(&self, finished_before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM processing_jobs
            WHERE state IN ('completed', 'failed')
                AND completed_at < $1
            "#,
        )
        .bind(finished_before)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(count = count, "Purged finished jobs");
        }
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn stats(&self, kind: Option<JobKind>) -> StoreResult<JobStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE state = 'queued') AS queued,
                COUNT(*) FILTER (WHERE state = 'active') AS active,
                COUNT(*) FILTER (WHERE state = 'retrying') AS retrying,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'failed') AS failed
            FROM processing_jobs
            WHERE $1::text IS NULL OR kind = $1
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            queued: row.get::<Option<i64>, _>("queued").unwrap_or(0),
            active: row.get::<Option<i64>, _>("active").unwrap_or(0),
            retrying: row.get::<Option<i64>, _>("retrying").unwrap_or(0),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }
}
