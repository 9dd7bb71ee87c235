//! Job handler context trait
//!
//! The services layer implements this trait. The worker calls `job_started`
//! once a job is claimed, `dispatch_job` to run it, and `job_finished` with
//! the terminal outcome; retries in between are handled by the queue.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use assetflow_core::models::{JobArtifacts, JobOutcome, ProcessingJob};
use assetflow_core::ProcessorError;

/// Context for job dispatch.
///
/// The worker holds a weak reference so the pool never keeps the services
/// alive past shutdown.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Record that an attempt began. Called before every dispatch.
    async fn job_started(self: Arc<Self>, job: &ProcessingJob) -> Result<()>;

    /// Run the processor for the job's kind.
    async fn dispatch_job(
        self: Arc<Self>,
        job: &ProcessingJob,
    ) -> Result<JobArtifacts, ProcessorError>;

    /// Finish the job and apply its outcome to the asset atomically.
    async fn job_finished(self: Arc<Self>, job: &ProcessingJob, outcome: JobOutcome) -> Result<()>;
}

/// Placeholder context used before the real one exists. Dispatch always errors.
struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn job_started(self: Arc<Self>, _job: &ProcessingJob) -> Result<()> {
        Ok(())
    }

    async fn dispatch_job(
        self: Arc<Self>,
        _job: &ProcessingJob,
    ) -> Result<JobArtifacts, ProcessorError> {
        Err(anyhow!("NoopContext: no handler context available").into())
    }

    async fn job_finished(self: Arc<Self>, _job: &ProcessingJob, _outcome: JobOutcome) -> Result<()> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// A weak reference that never upgrades, for building a queue before the
/// context it dispatches to.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
