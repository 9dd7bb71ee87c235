use std::io::Cursor;

use anyhow::{anyhow, Context};
use image::ImageReader;

use assetflow_core::models::{Asset, AssetType, ExtractedMetadata};
use assetflow_core::{ProcessorError, ProcessorResultExt};

use super::tools::MediaTools;
use super::UNSUPPORTED_MEDIA;

/// Technical metadata for the asset's content.
pub async fn extract(
    asset: &Asset,
    data: &[u8],
    tools: &MediaTools,
) -> Result<ExtractedMetadata, ProcessorError> {
    match asset.asset_type {
        AssetType::Image => image_metadata(data),
        AssetType::Video | AssetType::Audio => probe_bytes(data, tools).await,
        _ => Ok(ExtractedMetadata {
            format: mime_subtype(&asset.mime_type),
            ..Default::default()
        }),
    }
}

/// Dimensions and format from the image header, without decoding pixels.
pub fn image_metadata(data: &[u8]) -> Result<ExtractedMetadata, ProcessorError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .permanent(UNSUPPORTED_MEDIA)?;
    let format = reader.format().ok_or_else(|| {
        ProcessorError::permanent(UNSUPPORTED_MEDIA, anyhow!("unrecognized image format"))
    })?;
    let (width, height) = reader.into_dimensions().permanent(UNSUPPORTED_MEDIA)?;

    Ok(ExtractedMetadata {
        width: i32::try_from(width).ok(),
        height: i32::try_from(height).ok(),
        format: Some(format!("{:?}", format).to_lowercase()),
        ..Default::default()
    })
}

async fn probe_bytes(data: &[u8], tools: &MediaTools) -> Result<ExtractedMetadata, ProcessorError> {
    let temp_file = tempfile::NamedTempFile::new().context("Failed to create probe file")?;
    tokio::fs::write(temp_file.path(), data)
        .await
        .context("Failed to stage probe file")?;
    tools.probe(temp_file.path()).await
}

fn mime_subtype(mime_type: &str) -> Option<String> {
    mime_type
        .split(';')
        .next()
        .and_then(|m| m.split_once('/'))
        .map(|(_, subtype)| subtype.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_image_metadata() {
        let metadata = image_metadata(&png(64, 32)).unwrap();
        assert_eq!(metadata.width, Some(64));
        assert_eq!(metadata.height, Some(32));
        assert_eq!(metadata.format.as_deref(), Some("png"));
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let err = image_metadata(b"definitely not an image").unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), UNSUPPORTED_MEDIA);
    }

    #[test]
    fn test_mime_subtype() {
        assert_eq!(mime_subtype("application/pdf").as_deref(), Some("pdf"));
        assert_eq!(
            mime_subtype("text/plain; charset=utf-8").as_deref(),
            Some("plain")
        );
        assert_eq!(mime_subtype("nonsense"), None);
    }
}
