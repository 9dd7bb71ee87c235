use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::asset::AccessLevel;
use super::descriptors::CustomMetadata;
use crate::error::AppError;

/// Request to register a new asset and obtain an upload URL
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUploadRequest {
    pub organization_id: Uuid,
    pub project_id: Uuid,
    /// Original filename as provided by the client
    #[validate(length(
        min = 1,
        max = 1024,
        message = "Filename must be between 1 and 1024 characters"
    ))]
    pub filename: String,
    #[validate(length(
        min = 3,
        max = 255,
        message = "MIME type must be between 3 and 255 characters"
    ))]
    pub mime_type: String,
    /// Declared size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub file_size: i64,
    /// `algorithm:hex-digest`
    #[validate(length(min = 1, max = 200, message = "Checksum is required"))]
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default)]
    pub custom_metadata: CustomMetadata,
}

/// Response for a created upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub asset_id: Uuid,
    /// Presigned URL the client PUTs the content to
    pub upload_url: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// What the client observed after uploading
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FinalizeUploadRequest {
    #[validate(length(min = 1, max = 200, message = "Checksum is required"))]
    pub checksum: String,
    #[validate(range(min = 0, message = "Size cannot be negative"))]
    pub size: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddVersionRequest {
    #[validate(length(
        min = 1,
        max = 1024,
        message = "Filename must be between 1 and 1024 characters"
    ))]
    pub filename: String,
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub file_size: i64,
}

/// Response for a new version: where to upload its content
#[derive(Debug, Clone, Serialize)]
pub struct VersionTicket {
    pub asset_id: Uuid,
    pub version: i32,
    pub upload_url: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Caller-editable descriptors. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDescriptorsRequest {
    pub tags: Option<Vec<String>>,
    pub custom_metadata: Option<CustomMetadata>,
    pub access_level: Option<AccessLevel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadTicket {
    pub url: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Run the derived validations and report the first failure as `INVALID_INPUT`.
pub fn validate_request<T: Validate>(request: &T) -> Result<(), AppError> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_request() -> CreateUploadRequest {
        CreateUploadRequest {
            organization_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            filename: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            file_size: 1024,
            checksum: "sha256:00".to_string(),
            tags: vec![],
            access_level: AccessLevel::default(),
            custom_metadata: CustomMetadata::new(),
        }
    }

    #[test]
    fn test_valid_upload_request() {
        assert!(validate_request(&upload_request()).is_ok());
    }

    #[test]
    fn test_upload_request_rejects_empty_filename() {
        let mut request = upload_request();
        request.filename = String::new();
        let err = validate_request(&request).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_upload_request_rejects_zero_size() {
        let mut request = upload_request();
        request.file_size = 0;
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_finalize_request_rejects_negative_size() {
        let request = FinalizeUploadRequest {
            checksum: "sha256:00".to_string(),
            size: -1,
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_update_request_deserializes_partial() {
        let request: UpdateDescriptorsRequest =
            serde_json::from_str(r#"{"tags": ["a", "b"]}"#).unwrap();
        assert_eq!(request.tags, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(request.custom_metadata.is_none());
        assert!(request.access_level.is_none());
    }
}
