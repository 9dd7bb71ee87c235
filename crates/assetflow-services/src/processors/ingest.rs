use anyhow::anyhow;
use bytes::Bytes;

use assetflow_core::models::{Asset, AssetType, AssetVersion, JobArtifacts, RenditionSet};
use assetflow_core::{ProcessorError, ProcessorResultExt};
use assetflow_storage::{Storage, StorageError};

use super::tools::MediaTools;
use super::{metadata, thumbnails, SIZE_MISMATCH, SOURCE_MISSING, STORAGE_UNAVAILABLE};

/// Read one version of the original after checking it exists with the
/// recorded size.
async fn load_version(
    version: &AssetVersion,
    storage: &dyn Storage,
) -> Result<Bytes, ProcessorError> {
    let info = match storage.head(&version.storage_key).await {
        Ok(info) => info,
        Err(StorageError::NotFound(key)) => {
            return Err(ProcessorError::permanent(
                SOURCE_MISSING,
                anyhow!("original {} was never uploaded", key),
            ))
        }
        Err(e) => return Err(ProcessorError::transient(STORAGE_UNAVAILABLE, e)),
    };

    if i64::try_from(info.size).ok() != Some(version.size) {
        return Err(ProcessorError::permanent(
            SIZE_MISMATCH,
            anyhow!(
                "stored original is {} bytes, version {} declares {}",
                info.size,
                version.version,
                version.size
            ),
        ));
    }

    storage
        .get(&version.storage_key)
        .await
        .transient(STORAGE_UNAVAILABLE)
}

/// The content verified at finalize. Versions appended while the asset is
/// still pending do not change what ingest reads.
pub async fn load_finalized(asset: &Asset, storage: &dyn Storage) -> Result<Bytes, ProcessorError> {
    load_version(asset.versions.finalized(), storage).await
}

/// Newest version whose content has been uploaded.
pub async fn load_newest_uploaded(
    asset: &Asset,
    storage: &dyn Storage,
) -> Result<Bytes, ProcessorError> {
    for version in asset.versions.newest_first() {
        match load_version(version, storage).await {
            Err(e) if e.code() == SOURCE_MISSING => {
                tracing::debug!(asset_id = %asset.id, version = version.version, "Version not uploaded, trying older");
            }
            result => return result,
        }
    }
    Err(ProcessorError::permanent(
        SOURCE_MISSING,
        anyhow!("no version of asset {} has been uploaded", asset.id),
    ))
}

/// Verify the original, then extract metadata and render whatever the asset
/// type calls for. Video previews come from a separate transcode job.
pub async fn ingest(
    asset: &Asset,
    storage: &dyn Storage,
    tools: &MediaTools,
) -> Result<JobArtifacts, ProcessorError> {
    let original = load_finalized(asset, storage).await?;
    let metadata = metadata::extract(asset, &original, tools).await?;
    let renditions = match asset.asset_type {
        AssetType::Image => thumbnails::generate(asset, original, storage).await?,
        _ => RenditionSet::new(),
    };

    tracing::info!(
        asset_id = %asset.id,
        asset_type = %asset.asset_type.as_str(),
        renditions = renditions.len(),
        "Ingest completed"
    );
    Ok(JobArtifacts {
        metadata,
        renditions,
    })
}
