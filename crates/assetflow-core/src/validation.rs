//! Descriptor validation
//!
//! Tags and custom metadata are normalized or rejected here before they reach
//! the lifecycle functions.

use regex::Regex;

use crate::error::AppError;
use crate::models::CustomMetadata;

pub const MAX_TAGS: usize = 50;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_CUSTOM_METADATA_KEYS: usize = 50;
pub const MAX_CUSTOM_METADATA_KEY_LENGTH: usize = 64;
pub const MAX_CUSTOM_METADATA_VALUE_LENGTH: usize = 1024;
pub const MAX_FILENAME_LENGTH: usize = 1024;

/// Trim, drop duplicates (first occurrence wins) and check limits.
pub fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>, AppError> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        let len = tag.chars().count();
        if len == 0 || len > MAX_TAG_LENGTH {
            return Err(AppError::InvalidInput(format!(
                "Tag '{}' must be between 1 and {} characters",
                tag, MAX_TAG_LENGTH
            )));
        }
        if !normalized.iter().any(|t| t == tag) {
            normalized.push(tag.to_string());
        }
    }
    if normalized.len() > MAX_TAGS {
        return Err(AppError::InvalidInput(format!(
            "At most {} tags are allowed, got {}",
            MAX_TAGS,
            normalized.len()
        )));
    }
    Ok(normalized)
}

pub fn validate_custom_metadata(metadata: &CustomMetadata) -> Result<(), AppError> {
    if metadata.len() > MAX_CUSTOM_METADATA_KEYS {
        return Err(AppError::InvalidInput(format!(
            "Custom metadata contains {} keys, but maximum allowed is {}",
            metadata.len(),
            MAX_CUSTOM_METADATA_KEYS
        )));
    }

    let pattern = Regex::new(r"^[a-zA-Z0-9_\-\.:]+$")
        .map_err(|e| AppError::Internal(format!("Invalid metadata key pattern: {}", e)))?;

    for (key, value) in metadata {
        if key.is_empty() || key.chars().count() > MAX_CUSTOM_METADATA_KEY_LENGTH {
            return Err(AppError::InvalidInput(format!(
                "Metadata key '{}' must be between 1 and {} characters",
                key, MAX_CUSTOM_METADATA_KEY_LENGTH
            )));
        }
        if !pattern.is_match(key) {
            return Err(AppError::InvalidInput(format!(
                "Metadata key '{}' contains invalid characters",
                key
            )));
        }
        if value.chars().count() > MAX_CUSTOM_METADATA_VALUE_LENGTH {
            return Err(AppError::InvalidInput(format!(
                "Metadata value for '{}' exceeds {} characters",
                key, MAX_CUSTOM_METADATA_VALUE_LENGTH
            )));
        }
    }

    Ok(())
}

/// `type/subtype` with optional parameters.
pub fn validate_mime_type(mime_type: &str) -> Result<(), AppError> {
    let pattern = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9!#$&^_.+\-]*/[a-zA-Z0-9][a-zA-Z0-9!#$&^_.+\-]*(\s*;.*)?$")
        .map_err(|e| AppError::Internal(format!("Invalid MIME type pattern: {}", e)))?;
    if !pattern.is_match(mime_type.trim()) {
        return Err(AppError::InvalidInput(format!(
            "Invalid MIME type: '{}'",
            mime_type
        )));
    }
    Ok(())
}

pub fn validate_filename(filename: &str) -> Result<(), AppError> {
    if filename.trim().is_empty() {
        return Err(AppError::InvalidInput("Filename cannot be empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "Filename exceeds {} bytes",
            MAX_FILENAME_LENGTH
        )));
    }
    Ok(())
}
