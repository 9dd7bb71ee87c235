//! Error types module
//!
//! Every failure surfaced by the asset lifecycle is an `AppError`. Each variant
//! self-describes its machine code, HTTP-equivalent status, recoverability and
//! class through the `ErrorMetadata` trait so that callers can decide whether
//! to retry, fix their input or stop.

use std::io;

use uuid::Uuid;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as validation failures
    Debug,
    /// Recoverable issues such as conflicts
    Warn,
    /// Unexpected failures
    Error,
}

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A referenced entity (organization, project, asset, job) does not exist
    Reference,
    /// Uniqueness or concurrent-modification failure
    Conflict,
    /// The operation is not valid for the entity's current status
    State,
    /// Uploaded content does not match what was declared
    Integrity,
    /// Infrastructure failure, safe to retry
    Transient,
    /// A processing job failed
    Processing,
    /// Caller is not permitted to perform the operation
    Access,
    /// Malformed request
    Input,
}

/// Metadata for error responses
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "DUPLICATE_ASSET")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried as-is)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;

    /// Error class used by clients to pick a recovery strategy
    fn class(&self) -> ErrorClass;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Duplicate asset: checksum already used by asset {existing_id}")]
    DuplicateAsset { existing_id: Uuid },

    #[error("Asset not found: {0}")]
    AssetNotFound(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Upload URL for asset {0} has expired")]
    UploadUrlExpired(Uuid),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Size mismatch: declared {declared} bytes, got {actual} bytes")]
    SizeMismatch { declared: i64, actual: i64 },

    #[error("File too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: i64, max: i64 },

    #[error("Asset not ready: {0}")]
    NotReady(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant:
/// (http_status, error_code, recoverable, suggested_action, sensitive, log_level, class).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
    ErrorClass,
) {
    match err {
        AppError::ReferenceNotFound(_) => (
            404,
            "REFERENCE_NOT_FOUND",
            false,
            Some("Verify the organization and project IDs"),
            false,
            LogLevel::Debug,
            ErrorClass::Reference,
        ),
        AppError::DuplicateAsset { .. } => (
            409,
            "DUPLICATE_ASSET",
            false,
            Some("Reuse the existing asset or delete it first"),
            false,
            LogLevel::Debug,
            ErrorClass::Conflict,
        ),
        AppError::AssetNotFound(_) => (
            404,
            "ASSET_NOT_FOUND",
            false,
            Some("Verify the asset ID exists"),
            false,
            LogLevel::Debug,
            ErrorClass::Reference,
        ),
        AppError::JobNotFound(_) => (
            404,
            "JOB_NOT_FOUND",
            false,
            Some("Verify the job ID exists"),
            false,
            LogLevel::Debug,
            ErrorClass::Reference,
        ),
        AppError::AccessDenied(_) => (
            403,
            "ACCESS_DENIED",
            false,
            Some("Request access from an organization administrator"),
            false,
            LogLevel::Debug,
            ErrorClass::Access,
        ),
        AppError::UploadUrlExpired(_) => (
            410,
            "UPLOAD_URL_EXPIRED",
            false,
            Some("Create a new upload"),
            false,
            LogLevel::Debug,
            ErrorClass::State,
        ),
        AppError::ChecksumMismatch { .. } => (
            422,
            "CHECKSUM_MISMATCH",
            false,
            Some("Re-upload the file as a new asset"),
            false,
            LogLevel::Warn,
            ErrorClass::Integrity,
        ),
        AppError::SizeMismatch { .. } => (
            422,
            "SIZE_MISMATCH",
            false,
            Some("Re-upload the file as a new asset"),
            false,
            LogLevel::Warn,
            ErrorClass::Integrity,
        ),
        AppError::FileTooLarge { .. } => (
            413,
            "FILE_TOO_LARGE",
            false,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
            ErrorClass::Integrity,
        ),
        AppError::NotReady(_) => (
            409,
            "NOT_READY",
            true,
            Some("Wait for processing to complete and retry"),
            false,
            LogLevel::Debug,
            ErrorClass::State,
        ),
        AppError::InvalidState(_) => (
            409,
            "INVALID_STATE",
            false,
            Some("Check the asset status before retrying"),
            false,
            LogLevel::Debug,
            ErrorClass::State,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
            ErrorClass::Input,
        ),
        AppError::Conflict(_) => (
            409,
            "CONFLICT",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
            ErrorClass::Conflict,
        ),
        AppError::Storage(_) => (
            502,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
            ErrorClass::Transient,
        ),
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
            ErrorClass::Transient,
        ),
        AppError::ServiceUnavailable(_) => (
            503,
            "SERVICE_UNAVAILABLE",
            true,
            Some("Wait 30-60 seconds and retry"),
            false,
            LogLevel::Warn,
            ErrorClass::Transient,
        ),
        AppError::Processing(_) => (
            500,
            "PROCESSING_FAILED",
            false,
            Some("Retry processing or upload a different file"),
            false,
            LogLevel::Warn,
            ErrorClass::Processing,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
            ErrorClass::Transient,
        ),
    }
}

impl AppError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn class(&self) -> ErrorClass {
        app_error_static_metadata(self).6
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            AppError::ReferenceNotFound(msg)
            | AppError::AccessDenied(msg)
            | AppError::NotReady(msg)
            | AppError::InvalidState(msg)
            | AppError::InvalidInput(msg)
            | AppError::Conflict(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Processing(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_asset_metadata() {
        let err = AppError::DuplicateAsset {
            existing_id: Uuid::nil(),
        };
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "DUPLICATE_ASSET");
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains(&Uuid::nil().to_string()));
    }

    #[test]
    fn test_checksum_mismatch_is_integrity() {
        let err = AppError::ChecksumMismatch {
            expected: "sha256:aa".to_string(),
            actual: "sha256:bb".to_string(),
        };
        assert_eq!(err.error_code(), "CHECKSUM_MISMATCH");
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_transient_errors_are_recoverable_and_sensitive() {
        for err in [
            AppError::Database("pool closed".to_string()),
            AppError::Storage("timeout".to_string()),
            AppError::Internal("boom".to_string()),
        ] {
            assert!(err.is_recoverable(), "{} should be recoverable", err);
            assert!(err.is_sensitive());
            assert_eq!(err.class(), ErrorClass::Transient);
        }
        assert_eq!(
            AppError::Database("pool closed".to_string()).client_message(),
            "Failed to access database"
        );
    }

    #[test]
    fn test_state_errors() {
        let err = AppError::InvalidState("asset is completed".to_string());
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(err.class(), ErrorClass::State);
        assert_eq!(err.client_message(), "asset is completed");

        let err = AppError::NotReady("still processing".to_string());
        assert!(err.is_recoverable());
        assert_eq!(err.class(), ErrorClass::State);
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err: AppError = anyhow::anyhow!("disk full")
            .context("writing rendition")
            .into();
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("writing rendition"));
    }
}
