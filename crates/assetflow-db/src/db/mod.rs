//! PostgreSQL implementations of the asset and job stores
//
// Asset rows, their version ledger and the transactional commit
pub mod asset;
//
// Reference lookups for organizations and projects
pub mod directory;
//
// Job queue table
pub mod job;
//
// Row mapping shared by the repositories
mod rows;
//
// Transaction utilities
pub mod transaction;

pub use asset::{PgAssetStore, JOB_NOTIFY_CHANNEL};
pub use directory::PgReferenceDirectory;
pub use job::PgJobStore;
pub use transaction::TransactionGuard;

/// Apply the workspace migrations in `migrations/`.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
