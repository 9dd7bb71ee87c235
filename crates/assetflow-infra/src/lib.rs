//! Assetflow Infrastructure Library
//!
//! Shared plumbing used by the worker and the binary:
//! - Telemetry initialization
//! - Per-kind job rate limiting

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};

#[cfg(feature = "rate-limit")]
pub use rate_limit::RateLimiter;
