//! Assetflow Services
//!
//! The asset orchestrator, the processing context the worker pool dispatches
//! to, the default processors and periodic maintenance.

pub mod context;
pub mod maintenance;
pub mod processors;
pub mod service;

pub use context::ProcessingContext;
pub use maintenance::{MaintenanceReport, MaintenanceService};
pub use processors::{MediaTools, Processors};
pub use service::{AssetService, AssetServiceConfig, DEFAULT_COMMIT_ATTEMPTS};
