//! Job handler context for the worker pool
//!
//! Bridges the queue to the orchestrator: attempts start and finish through
//! `AssetService`, and dispatch runs the processor for the job's kind.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use assetflow_core::models::{JobArtifacts, JobKind, JobOutcome, ProcessingJob};
use assetflow_core::ProcessorError;
use assetflow_db::AssetStore;
use assetflow_worker::JobHandlerContext;

use crate::processors::{Processors, ASSET_MISSING, STORE_UNAVAILABLE};
use crate::service::AssetService;

pub struct ProcessingContext {
    service: Arc<AssetService>,
    assets: Arc<dyn AssetStore>,
    processors: Processors,
}

impl ProcessingContext {
    pub fn new(
        service: Arc<AssetService>,
        assets: Arc<dyn AssetStore>,
        processors: Processors,
    ) -> Self {
        Self {
            service,
            assets,
            processors,
        }
    }
}

#[async_trait]
impl JobHandlerContext for ProcessingContext {
    async fn job_started(self: Arc<Self>, job: &ProcessingJob) -> anyhow::Result<()> {
        self.service.begin_processing(job).await?;
        Ok(())
    }

    async fn dispatch_job(
        self: Arc<Self>,
        job: &ProcessingJob,
    ) -> Result<JobArtifacts, ProcessorError> {
        if job.kind == JobKind::Cleanup {
            return self.processors.cleanup(job).await;
        }

        let asset = match self.assets.get_asset(job.asset_id).await {
            Ok(Some(asset)) => asset,
            Ok(None) => {
                return Err(ProcessorError::permanent(
                    ASSET_MISSING,
                    anyhow!("asset {} does not exist", job.asset_id),
                ))
            }
            Err(e) => return Err(ProcessorError::transient(STORE_UNAVAILABLE, e)),
        };

        if asset.is_deleted() {
            tracing::debug!(
                job_id = %job.id,
                asset_id = %asset.id,
                "Asset deleted before processing, skipping"
            );
            return Ok(JobArtifacts::default());
        }

        self.processors.run(job, &asset).await
    }

    async fn job_finished(self: Arc<Self>, job: &ProcessingJob, outcome: JobOutcome) -> anyhow::Result<()> {
        self.service.apply_processing_result(job.id, outcome).await?;
        Ok(())
    }
}
