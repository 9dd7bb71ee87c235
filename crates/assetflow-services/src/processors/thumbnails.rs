use std::io::Cursor;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};

use assetflow_core::models::{Asset, AssetType, Rendition, RenditionKind, RenditionSet};
use assetflow_core::task_error::PROCESSING_FAILED;
use assetflow_core::{ProcessorError, ProcessorResultExt};
use assetflow_storage::{rendition_filename, rendition_key, Storage};

use super::{STORAGE_UNAVAILABLE, UNSUPPORTED_MEDIA};

const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Longest edge of each thumbnail kind.
pub const THUMBNAIL_SIZES: [(RenditionKind, u32); 2] = [
    (RenditionKind::ThumbnailSmall, 256),
    (RenditionKind::ThumbnailLarge, 1024),
];

#[derive(Debug)]
pub struct RenderedThumbnail {
    pub kind: RenditionKind,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Scale down to fit a `max_edge` square, keeping the aspect ratio. Smaller
/// images are left at their size.
fn fit_within(img: &DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_edge && height <= max_edge {
        img.clone()
    } else {
        img.thumbnail(max_edge, max_edge)
    }
}

/// Decode once and encode every thumbnail kind as JPEG.
pub fn render_thumbnails(data: &[u8]) -> anyhow::Result<Vec<RenderedThumbnail>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;

    THUMBNAIL_SIZES
        .iter()
        .map(|&(kind, max_edge)| -> anyhow::Result<RenderedThumbnail> {
            let resized = fit_within(&img, max_edge);
            let (width, height) = resized.dimensions();
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
            let mut buffer = Vec::new();
            rgb.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)?;
            Ok(RenderedThumbnail {
                kind,
                data: buffer,
                width,
                height,
            })
        })
        .collect()
}

/// Render and store the thumbnails of an image asset.
pub async fn generate(
    asset: &Asset,
    original: Bytes,
    storage: &dyn Storage,
) -> Result<RenditionSet, ProcessorError> {
    if asset.asset_type != AssetType::Image {
        return Err(ProcessorError::permanent(
            UNSUPPORTED_MEDIA,
            anyhow!("thumbnails need an image, asset is {}", asset.asset_type.as_str()),
        ));
    }

    let rendered = tokio::task::spawn_blocking(move || render_thumbnails(&original))
        .await
        .map_err(|e| {
            ProcessorError::transient(PROCESSING_FAILED, anyhow!("thumbnail task failed: {}", e))
        })?
        .permanent(UNSUPPORTED_MEDIA)?;

    let generated_at = Utc::now();
    let mut renditions = RenditionSet::new();
    for thumbnail in rendered {
        let storage_key = rendition_key(
            asset.organization_id,
            asset.project_id,
            asset.id,
            thumbnail.kind,
            rendition_filename(thumbnail.kind),
        );
        let size = thumbnail.data.len() as i64;
        storage
            .put(&storage_key, Bytes::from(thumbnail.data), THUMBNAIL_CONTENT_TYPE)
            .await
            .transient(STORAGE_UNAVAILABLE)?;

        tracing::debug!(
            asset_id = %asset.id,
            rendition = %thumbnail.kind,
            width = thumbnail.width,
            height = thumbnail.height,
            size,
            "Thumbnail stored"
        );
        renditions.insert(
            thumbnail.kind,
            Rendition {
                storage_key,
                width: thumbnail.width as i32,
                height: thumbnail.height as i32,
                size,
                content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
                generated_at,
            },
        );
    }
    Ok(renditions)
}
