use anyhow::{anyhow, Context};
use bytes::Bytes;
use chrono::Utc;

use assetflow_core::models::{Asset, AssetType, Rendition, RenditionKind, RenditionSet};
use assetflow_core::{ProcessorError, ProcessorResultExt};
use assetflow_storage::{rendition_filename, rendition_key, Storage};

use super::tools::{MediaTools, PREVIEW_HEIGHT};
use super::{STORAGE_UNAVAILABLE, UNSUPPORTED_MEDIA};

const PREVIEW_CONTENT_TYPE: &str = "video/mp4";

/// Transcode a video asset to its `preview_720p` rendition and store it.
pub async fn preview(
    asset: &Asset,
    original: &[u8],
    storage: &dyn Storage,
    tools: &MediaTools,
) -> Result<RenditionSet, ProcessorError> {
    if asset.asset_type != AssetType::Video {
        return Err(ProcessorError::permanent(
            UNSUPPORTED_MEDIA,
            anyhow!("previews need a video, asset is {}", asset.asset_type.as_str()),
        ));
    }

    let kind = RenditionKind::Preview720p;
    let workdir = tempfile::tempdir().context("Failed to create transcode workspace")?;
    let input = workdir.path().join("source");
    let output = workdir.path().join(rendition_filename(kind));
    tokio::fs::write(&input, original)
        .await
        .context("Failed to stage transcode input")?;

    tools.transcode_preview(&input, &output).await?;
    let probed = tools.probe(&output).await?;
    let encoded = tokio::fs::read(&output)
        .await
        .context("Failed to read transcode output")?;

    let storage_key = rendition_key(
        asset.organization_id,
        asset.project_id,
        asset.id,
        kind,
        rendition_filename(kind),
    );
    let size = encoded.len() as i64;
    storage
        .put(&storage_key, Bytes::from(encoded), PREVIEW_CONTENT_TYPE)
        .await
        .transient(STORAGE_UNAVAILABLE)?;

    tracing::info!(asset_id = %asset.id, storage_key = %storage_key, size, "Preview stored");

    let mut renditions = RenditionSet::new();
    renditions.insert(
        kind,
        Rendition {
            storage_key,
            width: probed.width.unwrap_or(0),
            height: probed.height.unwrap_or(PREVIEW_HEIGHT as i32),
            size,
            content_type: PREVIEW_CONTENT_TYPE.to_string(),
            generated_at: Utc::now(),
        },
    );
    Ok(renditions)
}
