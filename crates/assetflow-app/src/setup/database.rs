//! Store setup: PostgreSQL with migrations, or in-memory for development

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use assetflow_core::{Config, ReferenceDirectory, StaticDirectory, StoreBackend};
use assetflow_db::{
    run_migrations, AssetStore, JobStore, MemoryStore, PgAssetStore, PgJobStore,
    PgReferenceDirectory,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub struct Stores {
    pub assets: Arc<dyn AssetStore>,
    pub jobs: Arc<dyn JobStore>,
    pub directory: Arc<dyn ReferenceDirectory>,
    /// Set for PostgreSQL; workers LISTEN on it for new jobs.
    pub pool: Option<PgPool>,
}

pub async fn setup_stores(config: &Config) -> Result<Stores> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = setup_database(config).await?;
            Ok(Stores {
                assets: Arc::new(PgAssetStore::new(pool.clone())),
                jobs: Arc::new(PgJobStore::new(pool.clone())),
                directory: Arc::new(PgReferenceDirectory::new(pool.clone())),
                pool: Some(pool),
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; records are lost on restart");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                assets: store.clone(),
                jobs: store,
                directory: Arc::new(StaticDirectory::new()),
                pool: None,
            })
        }
    }
}

/// Connection pool plus pending migrations.
async fn setup_database(config: &Config) -> Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the postgres store")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}
