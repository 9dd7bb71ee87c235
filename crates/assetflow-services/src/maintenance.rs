use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;

use assetflow_core::AppError;

use crate::service::AssetService;

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_uploads: usize,
    pub purged_jobs: u64,
}

/// Periodic upkeep: fails uploads whose window elapsed and purges finished
/// jobs past their retention.
#[derive(Clone)]
pub struct MaintenanceService {
    service: Arc<AssetService>,
    interval: Duration,
    job_retention_days: i64,
}

impl MaintenanceService {
    pub fn new(service: Arc<AssetService>, interval: Duration, job_retention_days: i64) -> Self {
        Self {
            service,
            interval,
            job_retention_days,
        }
    }

    /// Start the background loop. Returns a JoinHandle for shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);

            loop {
                ticker.tick().await;

                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Maintenance pass failed");
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<MaintenanceReport, AppError> {
        let expired_uploads = match self.service.expire_uploads(Utc::now()).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to expire stale uploads");
                0
            }
        };

        // Zero retention keeps job history forever
        let purged_jobs = if self.job_retention_days > 0 {
            self.service
                .purge_finished_jobs(self.job_retention_days)
                .await?
        } else {
            0
        };

        let report = MaintenanceReport {
            expired_uploads,
            purged_jobs,
        };
        tracing::debug!(
            expired_uploads = report.expired_uploads,
            purged_jobs = report.purged_jobs,
            "Maintenance pass completed"
        );
        Ok(report)
    }
}
