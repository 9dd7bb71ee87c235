//! Service and worker wiring

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use assetflow_core::{Config, DefaultAccessPolicy};
use assetflow_infra::RateLimiter;
use assetflow_services::{
    AssetService, AssetServiceConfig, MaintenanceService, MediaTools, ProcessingContext,
    Processors,
};
use assetflow_storage::Storage;
use assetflow_worker::{JobHandlerContext, JobQueue, JobQueueConfig};

use super::database::Stores;
use super::App;

pub fn initialize_services(
    config: &Config,
    stores: Stores,
    storage: Arc<dyn Storage>,
) -> Result<App> {
    let service = Arc::new(AssetService::new(
        stores.assets.clone(),
        stores.jobs.clone(),
        storage.clone(),
        stores.directory,
        Arc::new(DefaultAccessPolicy),
        AssetServiceConfig::from(config),
    ));

    let tools = MediaTools::from_config(config)?;
    let context = Arc::new(ProcessingContext::new(
        service.clone(),
        stores.assets,
        Processors::new(storage, tools),
    ));
    let handler: Arc<dyn JobHandlerContext> = context.clone();

    let queue_config = JobQueueConfig::from(config);
    let queue = JobQueue::new(
        stores.jobs,
        RateLimiter::new(config.transcode_rate_limit),
        queue_config,
        Arc::downgrade(&handler),
        stores.pool,
    );
    tracing::info!(
        max_workers = config.job_queue_max_workers,
        transcode_rate_limit = config.transcode_rate_limit,
        "Job queue started"
    );

    let maintenance = if config.upload_sweep_interval_secs > 0 {
        let maintenance = Arc::new(MaintenanceService::new(
            service,
            Duration::from_secs(config.upload_sweep_interval_secs),
            config.job_retention_days,
        ));
        Some(maintenance.start())
    } else {
        tracing::info!("Expired upload sweep disabled");
        None
    };

    Ok(App {
        queue,
        context,
        maintenance,
    })
}
