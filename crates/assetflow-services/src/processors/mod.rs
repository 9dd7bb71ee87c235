//! Default processors, one per job kind.
//!
//! Processors read the asset's content from storage, write renditions at
//! their deterministic keys and return the artifacts. They never touch asset
//! or job records; the outcome is applied by the orchestrator.

pub mod cleanup;
pub mod ingest;
pub mod metadata;
pub mod thumbnails;
pub mod tools;
pub mod transcode;

use std::sync::Arc;

use anyhow::anyhow;
use assetflow_core::models::{Asset, JobArtifacts, JobKind, JobPayload, ProcessingJob};
use assetflow_core::ProcessorError;
use assetflow_storage::Storage;

pub use tools::MediaTools;

/// The original is gone; retrying will not bring it back
pub const SOURCE_MISSING: &str = "SOURCE_MISSING";
/// Stored original disagrees with the recorded size
pub const SIZE_MISMATCH: &str = "SIZE_MISMATCH";
pub const UNSUPPORTED_MEDIA: &str = "UNSUPPORTED_MEDIA";
pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";
pub const TOOL_UNAVAILABLE: &str = "TOOL_UNAVAILABLE";
pub const PROBE_FAILED: &str = "PROBE_FAILED";
pub const TRANSCODE_FAILED: &str = "TRANSCODE_FAILED";
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
/// The asset record a job refers to does not exist
pub const ASSET_MISSING: &str = "ASSET_MISSING";
pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";

#[derive(Clone)]
pub struct Processors {
    storage: Arc<dyn Storage>,
    tools: MediaTools,
}

impl Processors {
    pub fn new(storage: Arc<dyn Storage>, tools: MediaTools) -> Self {
        Self { storage, tools }
    }

    /// Run the processor for an asset job.
    #[tracing::instrument(skip(self, job, asset), fields(job_id = %job.id, job.kind = %job.kind, asset_id = %asset.id))]
    pub async fn run(
        &self,
        job: &ProcessingJob,
        asset: &Asset,
    ) -> Result<JobArtifacts, ProcessorError> {
        let storage = self.storage.as_ref();
        match job.kind {
            JobKind::Ingest => ingest::ingest(asset, storage, &self.tools).await,
            JobKind::ExtractMetadata => {
                let original = ingest::load_newest_uploaded(asset, storage).await?;
                Ok(JobArtifacts {
                    metadata: metadata::extract(asset, &original, &self.tools).await?,
                    ..Default::default()
                })
            }
            JobKind::GenerateThumbnails => {
                let original = ingest::load_newest_uploaded(asset, storage).await?;
                Ok(JobArtifacts {
                    renditions: thumbnails::generate(asset, original, storage).await?,
                    ..Default::default()
                })
            }
            JobKind::Transcode => {
                let original = ingest::load_newest_uploaded(asset, storage).await?;
                Ok(JobArtifacts {
                    renditions: transcode::preview(asset, &original, storage, &self.tools).await?,
                    ..Default::default()
                })
            }
            JobKind::Cleanup => self.cleanup(job).await,
        }
    }

    /// Delete the objects a cleanup job lists. Needs no asset.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn cleanup(&self, job: &ProcessingJob) -> Result<JobArtifacts, ProcessorError> {
        match &job.payload {
            JobPayload::Cleanup { storage_keys } => {
                cleanup::remove_objects(storage_keys, self.storage.as_ref()).await
            }
            JobPayload::Asset => Err(ProcessorError::permanent(
                INVALID_PAYLOAD,
                anyhow!("cleanup job {} carries no storage keys", job.id),
            )),
        }
    }
}
