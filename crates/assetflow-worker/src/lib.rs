//! Assetflow Worker
//!
//! Claims processing jobs from the [`JobStore`](assetflow_db::JobStore),
//! runs them through a [`JobHandlerContext`] and records retries with capped
//! exponential backoff. Terminal outcomes are handed back to the context so
//! the asset and the job are finished in one commit.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, JobHandlerContext};
pub use queue::{JobQueue, JobQueueConfig, JOB_TIMEOUT, JOB_TIMED_OUT};
