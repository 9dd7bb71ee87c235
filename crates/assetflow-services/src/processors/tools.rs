//! External media tools: `ffprobe` for audio/video metadata and `ffmpeg` for
//! preview transcodes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::process::Command;

use assetflow_core::models::ExtractedMetadata;
use assetflow_core::{Config, ProcessorError, ProcessorResultExt};

use super::{PROBE_FAILED, TOOL_UNAVAILABLE, TRANSCODE_FAILED};

/// Height of the `preview_720p` rendition.
pub const PREVIEW_HEIGHT: u32 = 720;

/// Reject paths carrying shell metacharacters or traversal sequences.
fn validate_path(path: &str) -> Result<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if path.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!("Path contains dangerous characters: {}", path));
    }

    if path.contains("..") {
        return Err(anyhow!("Path contains directory traversal: {}", path));
    }

    Ok(())
}

fn validate_tool_path(name: &str, path: &str) -> Result<()> {
    validate_path(path).with_context(|| format!("Invalid {} path", name))?;
    if path.is_empty()
        || !path.chars().all(|c| {
            c.is_alphanumeric() || c == '/' || c == '-' || c == '_' || c == '.' || c == '\\'
        })
    {
        return Err(anyhow!("Invalid {} path: contains unsafe characters", name));
    }
    Ok(())
}

/// Validate and canonicalize a working file path.
fn canonical_input(path: &Path) -> Result<PathBuf> {
    validate_path(&path.to_string_lossy())?;
    path.canonicalize()
        .map_err(|e| anyhow!("Failed to canonicalize path: {}", e))
}

#[derive(Debug, Clone)]
pub struct MediaTools {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaTools {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Result<Self> {
        let ffmpeg_path = ffmpeg_path.into();
        let ffprobe_path = ffprobe_path.into();
        validate_tool_path("ffmpeg", &ffmpeg_path)?;
        validate_tool_path("ffprobe", &ffprobe_path)?;
        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone())
    }

    /// Probe a media file for its container and primary stream.
    #[tracing::instrument(skip(self), fields(
        process.executable.name = "ffprobe",
        process.executable.path = %self.ffprobe_path
    ))]
    pub async fn probe(&self, path: &Path) -> Result<ExtractedMetadata, ProcessorError> {
        let start = std::time::Instant::now();
        let input = canonical_input(path).permanent(PROBE_FAILED)?;

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(&input)
            .output()
            .await
            .map_err(|e| spawn_error("ffprobe", e))?;

        if !output.status.success() {
            return Err(ProcessorError::permanent(
                PROBE_FAILED,
                anyhow!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr)),
            ));
        }

        let probe: Value = serde_json::from_slice(&output.stdout)
            .context("Failed to parse ffprobe output")
            .permanent(PROBE_FAILED)?;
        let metadata = metadata_from_probe(&probe);

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            media_duration = ?metadata.duration,
            width = ?metadata.width,
            height = ?metadata.height,
            codec = ?metadata.codec,
            "Media probe completed"
        );
        Ok(metadata)
    }

    /// Transcode `input` to an H.264/AAC MP4 scaled to 720 lines.
    #[tracing::instrument(skip(self), fields(
        process.executable.name = "ffmpeg",
        process.executable.path = %self.ffmpeg_path
    ))]
    pub async fn transcode_preview(&self, input: &Path, output: &Path) -> Result<(), ProcessorError> {
        let start = std::time::Instant::now();
        let input = canonical_input(input).permanent(TRANSCODE_FAILED)?;
        validate_path(&output.to_string_lossy()).permanent(TRANSCODE_FAILED)?;

        let scale = format!("scale=-2:{}", PREVIEW_HEIGHT);
        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(&input)
            .args([
                "-vf",
                scale.as_str(),
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-profile:v",
                "main",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
            ])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| spawn_error("ffmpeg", e))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ProcessorError::permanent(
                TRANSCODE_FAILED,
                anyhow!("FFmpeg failed: {}", stderr),
            ));
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Preview transcode completed"
        );
        Ok(())
    }
}

/// A tool that is not installed will not appear on retry.
fn spawn_error(tool: &str, err: std::io::Error) -> ProcessorError {
    let err_msg = anyhow!("Failed to execute {}: {}", tool, err);
    if err.kind() == std::io::ErrorKind::NotFound {
        ProcessorError::permanent(TOOL_UNAVAILABLE, err_msg)
    } else {
        ProcessorError::transient(TOOL_UNAVAILABLE, err_msg)
    }
}

/// Map ffprobe JSON to extracted metadata. Dimensions come from the first
/// video stream; codec from the first video stream, else the first audio one.
pub fn metadata_from_probe(probe: &Value) -> ExtractedMetadata {
    let streams = probe["streams"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let stream_of = |kind: &str| streams.iter().find(|s| s["codec_type"].as_str() == Some(kind));
    let video = stream_of("video");
    let primary = video.or_else(|| stream_of("audio"));
    let format = &probe["format"];

    let dimension = |key: &str| {
        video
            .and_then(|s| s[key].as_i64())
            .and_then(|v| i32::try_from(v).ok())
    };

    ExtractedMetadata {
        width: dimension("width"),
        height: dimension("height"),
        duration: format["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok()),
        codec: primary
            .and_then(|s| s["codec_name"].as_str())
            .map(str::to_string),
        bitrate: format["bit_rate"]
            .as_str()
            .and_then(|b| b.parse::<i64>().ok()),
        page_count: None,
        format: format["format_name"]
            .as_str()
            .and_then(|f| f.split(',').next())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_paths_are_validated() {
        assert!(MediaTools::new("ffmpeg", "/usr/bin/ffprobe").is_ok());
        assert!(MediaTools::new("ffmpeg; rm -rf /", "ffprobe").is_err());
        assert!(MediaTools::new("ffmpeg", "../ffprobe").is_err());
        assert!(MediaTools::new("", "ffprobe").is_err());
    }

    #[test]
    fn test_metadata_from_video_probe() {
        let probe = json!({
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ],
            "format": {
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "12.500000",
                "bit_rate": "4000000"
            }
        });

        let metadata = metadata_from_probe(&probe);
        assert_eq!(metadata.width, Some(1920));
        assert_eq!(metadata.height, Some(1080));
        assert_eq!(metadata.duration, Some(12.5));
        assert_eq!(metadata.codec.as_deref(), Some("h264"));
        assert_eq!(metadata.bitrate, Some(4_000_000));
        assert_eq!(metadata.format.as_deref(), Some("mov"));
    }

    #[test]
    fn test_metadata_from_audio_probe() {
        let probe = json!({
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}],
            "format": {"format_name": "mp3", "duration": "180.0"}
        });

        let metadata = metadata_from_probe(&probe);
        assert_eq!(metadata.width, None);
        assert_eq!(metadata.codec.as_deref(), Some("mp3"));
        assert_eq!(metadata.duration, Some(180.0));
        assert_eq!(metadata.bitrate, None);
    }

    #[test]
    fn test_metadata_from_empty_probe() {
        assert!(metadata_from_probe(&json!({})).is_empty());
    }
}
