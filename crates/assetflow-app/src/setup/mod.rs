//! Application setup and initialization
//!
//! Wiring order: config, telemetry, stores, storage, services, workers.

pub mod database;
pub mod services;
pub mod shutdown;

use std::sync::Arc;

use anyhow::{Context, Result};
use assetflow_core::Config;
use assetflow_infra::LogFormat;
use assetflow_services::ProcessingContext;
use assetflow_storage::Storage;
use assetflow_worker::JobQueue;
use tokio::task::JoinHandle;

/// Everything that must stay alive while the service runs.
pub struct App {
    pub queue: JobQueue,
    /// Workers hold a weak handle; dropping this stops dispatch.
    pub context: Arc<ProcessingContext>,
    pub maintenance: Option<JoinHandle<()>>,
}

impl App {
    /// Stop claiming jobs and background maintenance, then flush telemetry.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
        if let Some(handle) = self.maintenance {
            handle.abort();
        }
        drop(self.context);
        assetflow_infra::shutdown_telemetry().await;
    }
}

pub async fn initialize_app(config: Config) -> Result<App> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    let format: LogFormat = config.log_format.parse()?;
    assetflow_infra::init_telemetry(format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment,
        worker_id = %config.worker_id,
        "Configuration loaded and validated successfully"
    );

    let stores = database::setup_stores(&config).await?;

    let storage = assetflow_storage::create_storage(&config)
        .await
        .context("Failed to initialize object storage")?;
    tracing::info!(provider = %storage.provider().as_str(), "Object storage ready");

    services::initialize_services(&config, stores, storage)
}
