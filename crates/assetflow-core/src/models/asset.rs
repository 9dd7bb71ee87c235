use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checksum::Checksum;
use super::descriptors::{CustomMetadata, ExtractedMetadata};
use super::ledger::VersionLedger;
use super::rendition::RenditionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Uploading,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AssetStatus {
    /// Edges of the lifecycle graph. `Failed -> Pending` is listed here but
    /// only the explicit retry operation takes it.
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        use AssetStatus::*;
        matches!(
            (self, next),
            (Uploading, Pending)
                | (Uploading, Failed)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Uploading => "uploading",
            AssetStatus::Pending => "pending",
            AssetStatus::Processing => "processing",
            AssetStatus::Completed => "completed",
            AssetStatus::Failed => "failed",
        }
    }
}

impl Display for AssetStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(AssetStatus::Uploading),
            "pending" => Ok(AssetStatus::Pending),
            "processing" => Ok(AssetStatus::Processing),
            "completed" => Ok(AssetStatus::Completed),
            "failed" => Ok(AssetStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid asset status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Image,
    Video,
    Document,
    Audio,
    Archive,
    Other,
}

impl AssetType {
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let (top, sub) = mime.split_once('/').unwrap_or((mime.as_str(), ""));
        match top {
            "image" => AssetType::Image,
            "video" => AssetType::Video,
            "audio" => AssetType::Audio,
            "text" => AssetType::Document,
            "application" => match sub {
                "pdf" | "msword" | "rtf" | "vnd.oasis.opendocument.text"
                | "vnd.oasis.opendocument.spreadsheet" | "vnd.ms-excel"
                | "vnd.ms-powerpoint" => AssetType::Document,
                s if s.starts_with("vnd.openxmlformats-officedocument") => AssetType::Document,
                "zip" | "gzip" | "x-gzip" | "x-tar" | "x-7z-compressed" | "x-rar-compressed"
                | "vnd.rar" | "x-bzip2" => AssetType::Archive,
                _ => AssetType::Other,
            },
            _ => AssetType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Image => "image",
            AssetType::Video => "video",
            AssetType::Document => "document",
            AssetType::Audio => "audio",
            AssetType::Archive => "archive",
            AssetType::Other => "other",
        }
    }
}

impl FromStr for AssetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(AssetType::Image),
            "video" => Ok(AssetType::Video),
            "document" => Ok(AssetType::Document),
            "audio" => Ok(AssetType::Audio),
            "archive" => Ok(AssetType::Archive),
            "other" => Ok(AssetType::Other),
            _ => Err(anyhow::anyhow!("Invalid asset type: {}", s)),
        }
    }
}

/// Object storage provider holding an asset's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Local,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::S3 => "s3",
            StorageProvider::Local => "local",
        }
    }
}

impl Display for StorageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageProvider::S3),
            "local" => Ok(StorageProvider::Local),
            _ => Err(anyhow::anyhow!("Invalid storage provider: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Private,
    Organization,
    Public,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Private => "private",
            AccessLevel::Organization => "organization",
            AccessLevel::Public => "public",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(AccessLevel::Private),
            "organization" => Ok(AccessLevel::Organization),
            "public" => Ok(AccessLevel::Public),
            _ => Err(anyhow::anyhow!("Invalid access level: {}", s)),
        }
    }
}

/// Why an asset ended up `failed` (or why an auxiliary job on a completed
/// asset failed). `job_id` is absent when the failure happened at finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub code: String,
    pub message: String,
    pub job_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub uploader_id: Uuid,
    pub original_filename: String,
    pub mime_type: String,
    pub asset_type: AssetType,
    pub file_size: i64,
    pub checksum: Checksum,
    pub status: AssetStatus,
    pub storage_provider: StorageProvider,
    /// Key of version 1
    pub storage_key: String,
    pub versions: VersionLedger,
    pub renditions: RenditionSet,
    pub tags: Vec<String>,
    pub metadata: ExtractedMetadata,
    pub custom_metadata: CustomMetadata,
    pub access_level: AccessLevel,
    pub view_count: i64,
    pub download_count: i64,
    pub processing_error: Option<ProcessingError>,
    pub upload_expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every commit
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn latest_version(&self) -> i32 {
        self.versions.latest_version()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Every object this asset owns: all versions and all renditions.
    pub fn all_storage_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .versions
            .iter()
            .map(|v| v.storage_key.clone())
            .chain(self.renditions.storage_keys().map(str::to_string))
            .collect();
        keys.dedup();
        keys
    }

    pub fn upload_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.upload_expires_at
            .map(|expires| now >= expires)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_from_mime() {
        assert_eq!(AssetType::from_mime("image/png"), AssetType::Image);
        assert_eq!(AssetType::from_mime("Video/MP4"), AssetType::Video);
        assert_eq!(AssetType::from_mime("audio/mpeg"), AssetType::Audio);
        assert_eq!(AssetType::from_mime("application/pdf"), AssetType::Document);
        assert_eq!(
            AssetType::from_mime(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            AssetType::Document
        );
        assert_eq!(
            AssetType::from_mime("text/plain; charset=utf-8"),
            AssetType::Document
        );
        assert_eq!(AssetType::from_mime("application/zip"), AssetType::Archive);
        assert_eq!(
            AssetType::from_mime("application/octet-stream"),
            AssetType::Other
        );
        assert_eq!(AssetType::from_mime("garbage"), AssetType::Other);
    }

    #[test]
    fn test_status_edges() {
        use AssetStatus::*;
        assert!(Uploading.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Uploading.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trips() {
        for status in [
            AssetStatus::Uploading,
            AssetStatus::Pending,
            AssetStatus::Processing,
            AssetStatus::Completed,
            AssetStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AssetStatus>().unwrap(), status);
        }
    }
}
