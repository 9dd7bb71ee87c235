//! Assetflow Core Library
//!
//! Domain models, the pure asset lifecycle state machine, error types,
//! configuration, validation and the collaborator traits shared by every
//! assetflow crate.

pub mod access;
pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod task_error;
pub mod validation;

pub use access::{AccessPolicy, Caller, DefaultAccessPolicy, Role};
pub use config::{Config, StoreBackend};
pub use directory::{ReferenceDirectory, StaticDirectory};
pub use error::{AppError, ErrorClass, ErrorMetadata, LogLevel};
pub use lifecycle::{DownloadTarget, FinalizeDecision, NewUpload, Transition};
pub use task_error::{ProcessorError, ProcessorResultExt};
