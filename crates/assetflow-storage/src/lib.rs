//! Assetflow Storage Library
//!
//! Object storage gateway for assetflow: the storage key strategy, the
//! `Storage` trait and its S3 and local filesystem implementations.
//!
//! # Storage key format
//!
//! - `org/{orgId}/proj/{projectId}/asset/{assetId}/original/v{version}/{filename}`
//! - `org/{orgId}/proj/{projectId}/asset/{assetId}/renditions/{renditionName}/{filename}`
//!
//! Key generation and parsing live in [`keys`] so every backend and every
//! worker agrees on the layout.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_storage;
pub use keys::{
    original_key, parse_key, rendition_filename, rendition_key, sanitize_filename, KeyError,
    KeyTarget, ParsedKey,
};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ObjectInfo, PresignedUrl, Storage, StorageError, StorageResult};
