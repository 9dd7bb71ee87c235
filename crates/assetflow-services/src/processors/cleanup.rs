use anyhow::anyhow;

use assetflow_core::models::JobArtifacts;
use assetflow_core::ProcessorError;
use assetflow_storage::{Storage, StorageError};

use super::STORAGE_UNAVAILABLE;

/// Delete every listed object. Objects that are already gone count as
/// deleted; any other failure fails the attempt so the whole list is retried.
pub async fn remove_objects(
    storage_keys: &[String],
    storage: &dyn Storage,
) -> Result<JobArtifacts, ProcessorError> {
    let mut failures = 0usize;
    let mut last_error = None;

    for key in storage_keys {
        match storage.delete(key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {
                tracing::debug!(key = %key, "Object removed");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to remove object");
                failures += 1;
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        return Err(ProcessorError::transient(
            STORAGE_UNAVAILABLE,
            anyhow!(
                "{} of {} objects could not be removed, last error: {}",
                failures,
                storage_keys.len(),
                e
            ),
        ));
    }

    tracing::info!(removed = storage_keys.len(), "Cleanup completed");
    Ok(JobArtifacts::default())
}
