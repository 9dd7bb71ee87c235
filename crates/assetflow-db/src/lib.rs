//! Assetflow Database Layer
//!
//! Persistence for assets and processing jobs behind the [`AssetStore`] and
//! [`JobStore`] traits, with a PostgreSQL implementation and an in-memory one
//! for development and tests.

pub mod db;
pub mod error;
pub mod memory;
pub mod store;

pub use db::{
    run_migrations, PgAssetStore, PgJobStore, PgReferenceDirectory, TransactionGuard,
    JOB_NOTIFY_CHANNEL,
};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{
    AssetFilter, AssetStore, Committed, Counter, JobStats, JobStore, DEFAULT_LIST_LIMIT,
    MAX_LIST_LIMIT,
};
