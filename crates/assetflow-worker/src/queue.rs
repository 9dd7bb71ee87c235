//! Job queue: worker pool, LISTEN/NOTIFY or polling, retry and stale-job reaping.
//!
//! Jobs are written by asset commits, never by the queue itself. The queue
//! claims them, runs them through the handler context and either schedules
//! another attempt or hands the terminal outcome back to the context.
//!
//! Shutdown: [`JobQueue::shutdown`] stops the pool from claiming; in-flight
//! jobs keep running. A job interrupted by process exit stays `active` until
//! the stale-job reaper redelivers it.

use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use assetflow_core::models::{JobError, JobLogEntry, JobOutcome, ProcessingJob};
use assetflow_core::{Config, ProcessorError};
use assetflow_db::{JobStore, JOB_NOTIFY_CHANNEL};
use assetflow_infra::RateLimiter;

use crate::context::JobHandlerContext;

/// Code recorded when an attempt exceeds the worker timeout.
pub const JOB_TIMEOUT: &str = "JOB_TIMEOUT";

/// Code recorded when a worker stopped reporting and no attempts remain.
pub const JOB_TIMED_OUT: &str = "JOB_TIMED_OUT";

#[derive(Clone, Debug)]
pub struct JobQueueConfig {
    pub worker_id: String,
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Wall-clock limit for one attempt
    pub job_timeout: Duration,
    /// Interval between runs of the stale job reaper; zero disables it
    pub stale_reap_interval_secs: u64,
    /// Added to the job timeout before an active job counts as stale
    pub stale_grace_secs: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            max_workers: 4,
            poll_interval_ms: 1000,
            job_timeout: Duration::from_secs(3600),
            stale_reap_interval_secs: 60,
            stale_grace_secs: 300,
        }
    }
}

impl From<&Config> for JobQueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            max_workers: config.job_queue_max_workers,
            poll_interval_ms: config.job_queue_poll_interval_ms,
            job_timeout: Duration::from_secs(config.job_queue_job_timeout_secs),
            stale_reap_interval_secs: config.job_queue_stale_reap_interval_secs,
            stale_grace_secs: config.job_queue_stale_grace_secs,
        }
    }
}

/// Everything an attempt needs, cloned into each spawned job task.
#[derive(Clone)]
struct Runner {
    jobs: Arc<dyn JobStore>,
    rate_limiter: RateLimiter,
    config: JobQueueConfig,
}

#[derive(Clone)]
pub struct JobQueue {
    runner: Runner,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create the queue and spawn its worker pool.
    ///
    /// With a `pool` the workers also wake on NOTIFY from
    /// [`JOB_NOTIFY_CHANNEL`]; without one they only poll.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        rate_limiter: RateLimiter,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let runner = Runner {
            jobs,
            rate_limiter,
            config,
        };

        let pool_runner = runner.clone();
        tokio::spawn(async move {
            Self::worker_pool(pool_runner, context, shutdown_rx, pool).await;
        });

        Self {
            runner,
            shutdown_tx,
        }
    }

    /// A queue without a worker pool. Jobs are only processed through
    /// [`JobQueue::run_once`] and [`JobQueue::process`].
    pub fn new_no_worker(
        jobs: Arc<dyn JobStore>,
        rate_limiter: RateLimiter,
        config: JobQueueConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            runner: Runner {
                jobs,
                rate_limiter,
                config,
            },
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.runner.config
    }

    /// Claim the next ready job and process it to the end of this attempt.
    ///
    /// Returns the id of the processed job, or `None` when nothing was ready.
    pub async fn run_once(&self, context: &Weak<dyn JobHandlerContext>) -> Result<Option<Uuid>> {
        let runner = &self.runner;
        match runner.claim().await? {
            Some(job) => {
                let id = job.id;
                runner.process(job, context).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Process a job that is already claimed by this worker.
    pub async fn process(
        &self,
        job: ProcessingJob,
        context: &Weak<dyn JobHandlerContext>,
    ) -> Result<()> {
        self.runner.process(job, context).await
    }

    /// Redeliver jobs whose worker stopped reporting.
    ///
    /// A job counts as stale once it has been active for longer than the job
    /// timeout plus the grace period. Returns how many jobs were reaped.
    pub async fn reap_stale(&self, context: &Weak<dyn JobHandlerContext>) -> Result<usize> {
        self.runner.reap_stale(context).await
    }

    async fn worker_pool(
        runner: Runner,
        context: Weak<dyn JobHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let config = &runner.config;
        tracing::info!(
            worker_id = %config.worker_id,
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = pool.is_some(),
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_reap_interval_secs > 0 {
            let reaper = runner.clone();
            let reaper_context = context.clone();
            let reap_interval = Duration::from_secs(config.stale_reap_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reaper.reap_stale(&reaper_context).await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    while runner.claim_and_dispatch_one(&semaphore, &context).await {}
                }
                _ = sleep(poll_interval) => {
                    while runner.claim_and_dispatch_one(&semaphore, &context).await {}
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    /// Signal the worker pool to stop claiming. Returns immediately.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Runner {
    /// Claim one job and spawn its attempt. False when nothing was dispatched.
    async fn claim_and_dispatch_one(
        &self,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
    ) -> bool {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return false;
            }
        };

        match self.claim().await {
            Ok(Some(job)) => {
                let runner = self.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = runner.process(job, &ctx).await {
                        tracing::error!(error = %e, "Job processing failed");
                    }
                });
                true
            }
            Ok(None) => {
                tracing::trace!("No jobs ready in queue");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim job from queue");
                false
            }
        }
    }

    /// Claim the next ready job. A job whose kind is out of rate tokens is put
    /// back untouched instead of waiting while `active`.
    async fn claim(&self) -> Result<Option<ProcessingJob>> {
        let Some(job) = self
            .jobs
            .claim_next(&self.config.worker_id, Utc::now())
            .await?
        else {
            return Ok(None);
        };
        if self.rate_limiter.try_acquire(job.kind).await {
            return Ok(Some(job));
        }
        tracing::debug!(job.id = %job.id, job.kind = %job.kind, "Rate limit reached, job released");
        self.jobs.release(job.id).await?;
        Ok(None)
    }

    #[tracing::instrument(
        skip(self, job, context),
        fields(job.id = %job.id, job.kind = %job.kind, asset.id = %job.asset_id, attempt = job.attempts)
    )]
    async fn process(&self, job: ProcessingJob, context: &Weak<dyn JobHandlerContext>) -> Result<()> {
        let Some(ctx) = context.upgrade() else {
            self.jobs.release(job.id).await?;
            return Err(anyhow::anyhow!(
                "JobHandlerContext was dropped, released job {}",
                job.id
            ));
        };

        if let Err(e) = ctx.clone().job_started(&job).await {
            tracing::warn!(error = %e, "Failed to record job start");
        }

        let result =
            tokio::time::timeout(self.config.job_timeout, ctx.clone().dispatch_job(&job)).await;

        match result {
            Ok(Ok(artifacts)) => {
                ctx.job_finished(&job, JobOutcome::Succeeded(artifacts)).await?;
                tracing::info!("Job completed successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    code = e.code(),
                    retryable = e.is_retryable(),
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    "Job attempt failed"
                );
                let error = job_error(&e);
                self.retry_or_fail(ctx, &job, e.code(), error, e.is_retryable())
                    .await
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.job_timeout.as_secs(),
                    "Job attempt timed out"
                );
                let error = JobError {
                    name: JOB_TIMEOUT.to_string(),
                    message: format!(
                        "attempt exceeded {}s",
                        self.config.job_timeout.as_secs()
                    ),
                    stack: None,
                };
                self.retry_or_fail(ctx, &job, JOB_TIMEOUT, error, true).await
            }
        }
    }

    async fn retry_or_fail(
        &self,
        ctx: Arc<dyn JobHandlerContext>,
        job: &ProcessingJob,
        code: &str,
        error: JobError,
        retryable: bool,
    ) -> Result<()> {
        if retryable && job.can_retry() {
            let backoff = job.kind.policy().backoff_after(job.attempts);
            let run_at = Utc::now() + chrono::Duration::from_std(backoff)?;
            let entry = JobLogEntry::warn(format!(
                "attempt {} failed: {}: {}; retrying in {}s",
                job.attempts,
                code,
                error.message,
                backoff.as_secs()
            ));
            self.jobs.schedule_retry(job.id, run_at, entry).await?;
            return Ok(());
        }

        tracing::error!(
            code = code,
            retryable = retryable,
            "Job failed permanently"
        );
        ctx.job_finished(
            job,
            JobOutcome::Failed {
                code: code.to_string(),
                error,
            },
        )
        .await
    }

    async fn reap_stale(&self, context: &Weak<dyn JobHandlerContext>) -> Result<usize> {
        let limit = self.config.job_timeout + Duration::from_secs(self.config.stale_grace_secs);
        let now = Utc::now();
        let stale = self
            .jobs
            .find_stale(now - chrono::Duration::from_std(limit)?)
            .await?;

        let mut reaped = 0;
        for job in stale {
            let worker = job.worker_id.clone().unwrap_or_default();
            let message = format!(
                "worker {} did not report within {}s",
                worker,
                limit.as_secs()
            );

            let outcome = if job.can_retry() {
                self.jobs
                    .schedule_retry(job.id, now, JobLogEntry::warn(message))
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            } else {
                match context.upgrade() {
                    Some(ctx) => {
                        let error = JobError {
                            name: JOB_TIMED_OUT.to_string(),
                            message,
                            stack: None,
                        };
                        ctx.job_finished(
                            &job,
                            JobOutcome::Failed {
                                code: JOB_TIMED_OUT.to_string(),
                                error,
                            },
                        )
                        .await
                    }
                    None => continue,
                }
            };

            match outcome {
                Ok(()) => {
                    reaped += 1;
                    tracing::warn!(
                        job.id = %job.id,
                        job.kind = %job.kind,
                        worker_id = %worker,
                        attempts = job.attempts,
                        "Reaped stale job"
                    );
                }
                // Finished or retried by its worker in the meantime
                Err(e) => tracing::debug!(job.id = %job.id, error = %e, "Stale job not reaped"),
            }
        }

        Ok(reaped)
    }
}

fn job_error(error: &ProcessorError) -> JobError {
    JobError {
        name: error.code().to_string(),
        message: error.to_string(),
        stack: Some(format!("{:?}", error.inner())),
    }
}
