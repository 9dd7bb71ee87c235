//! Rate limiting service
//!
//! Token buckets keyed by job kind, consulted by the worker pool before a job
//! is dispatched.

pub use limiter::RateLimiter;

mod limiter;
