//! Configuration module
//!
//! Settings are read from the environment (with `.env` support) once at
//! startup. Every value has a default suitable for local development except
//! the ones `validate` insists on for the selected backends.

use std::env;
use std::str::FromStr;

use crate::models::StorageProvider;

const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECS: u64 = 30;
const UPLOAD_URL_EXPIRY_SECS: u64 = 3600;
const DOWNLOAD_URL_EXPIRY_SECS: u64 = 900;
const MAX_UPLOAD_SIZE_BYTES: i64 = 5 * 1024 * 1024 * 1024;
const JOB_QUEUE_MAX_WORKERS: usize = 4;
const JOB_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const JOB_QUEUE_JOB_TIMEOUT_SECS: u64 = 3600;
const JOB_QUEUE_STALE_REAP_INTERVAL_SECS: u64 = 60;
const JOB_QUEUE_STALE_GRACE_SECS: u64 = 300;
const UPLOAD_SWEEP_INTERVAL_SECS: u64 = 300;
const JOB_RETENTION_DAYS: i64 = 30;
const TRANSCODE_RATE_LIMIT: f64 = 0.5;

/// Longest presigned URL lifetime accepted by S3-compatible stores.
pub const MAX_PRESIGNED_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Where asset and job records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub log_format: String,

    // Persistence
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,

    // Object storage
    pub storage_backend: StorageProvider,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    /// HMAC secret for local presigned URLs
    pub local_storage_signing_secret: Option<String>,

    // Uploads and downloads
    pub upload_url_expiry_secs: u64,
    pub download_url_expiry_secs: u64,
    pub max_upload_size_bytes: i64,
    /// 0 disables the expired-upload sweep
    pub upload_sweep_interval_secs: u64,

    // Job queue
    pub worker_id: String,
    pub job_queue_max_workers: usize,
    pub job_queue_poll_interval_ms: u64,
    pub job_queue_job_timeout_secs: u64,
    /// 0 disables the stale job reaper
    pub job_queue_stale_reap_interval_secs: u64,
    pub job_queue_stale_grace_secs: u64,
    /// 0 disables the finished job purge
    pub job_retention_days: i64,
    /// Transcode jobs started per second
    pub transcode_rate_limit: f64,

    // Processing tools
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let store_backend = match optional("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None => StoreBackend::Postgres,
        };
        let storage_backend = match optional("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageProvider::Local,
        };

        let worker_id = optional("WORKER_ID").unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "worker".to_string());
            format!("{}-{}", host, std::process::id())
        });

        Ok(Config {
            environment,
            log_format: optional("LOG_FORMAT").unwrap_or_else(|| "pretty".to_string()),
            store_backend,
            database_url: optional("DATABASE_URL"),
            db_max_connections: var_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_timeout_seconds: var_or("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            storage_backend,
            s3_bucket: optional("S3_BUCKET"),
            s3_region: optional("S3_REGION").or_else(|| optional("AWS_REGION")),
            s3_endpoint: optional("S3_ENDPOINT"),
            local_storage_path: optional("LOCAL_STORAGE_PATH"),
            local_storage_base_url: optional("LOCAL_STORAGE_BASE_URL"),
            local_storage_signing_secret: optional("LOCAL_STORAGE_SIGNING_SECRET"),
            upload_url_expiry_secs: var_or("UPLOAD_URL_EXPIRY_SECS", UPLOAD_URL_EXPIRY_SECS),
            download_url_expiry_secs: var_or("DOWNLOAD_URL_EXPIRY_SECS", DOWNLOAD_URL_EXPIRY_SECS),
            max_upload_size_bytes: var_or("MAX_UPLOAD_SIZE_BYTES", MAX_UPLOAD_SIZE_BYTES),
            upload_sweep_interval_secs: var_or(
                "UPLOAD_SWEEP_INTERVAL_SECS",
                UPLOAD_SWEEP_INTERVAL_SECS,
            ),
            worker_id,
            job_queue_max_workers: var_or("JOB_QUEUE_MAX_WORKERS", JOB_QUEUE_MAX_WORKERS),
            job_queue_poll_interval_ms: var_or(
                "JOB_QUEUE_POLL_INTERVAL_MS",
                JOB_QUEUE_POLL_INTERVAL_MS,
            ),
            job_queue_job_timeout_secs: var_or(
                "JOB_QUEUE_JOB_TIMEOUT_SECS",
                JOB_QUEUE_JOB_TIMEOUT_SECS,
            ),
            job_queue_stale_reap_interval_secs: var_or(
                "JOB_QUEUE_STALE_REAP_INTERVAL_SECS",
                JOB_QUEUE_STALE_REAP_INTERVAL_SECS,
            ),
            job_queue_stale_grace_secs: var_or(
                "JOB_QUEUE_STALE_GRACE_SECS",
                JOB_QUEUE_STALE_GRACE_SECS,
            ),
            job_retention_days: var_or("JOB_RETENTION_DAYS", JOB_RETENTION_DAYS),
            transcode_rate_limit: var_or("TRANSCODE_RATE_LIMIT", TRANSCODE_RATE_LIMIT),
            ffmpeg_path: optional("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: optional("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.store_backend == StoreBackend::Postgres {
            match &self.database_url {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string when STORE_BACKEND=postgres"
                    ))
                }
            }
        }

        match self.storage_backend {
            StorageProvider::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!("S3_BUCKET is required when STORAGE_BACKEND=s3"));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION is required when STORAGE_BACKEND=s3"
                    ));
                }
            }
            StorageProvider::Local => {
                if self.is_production() && self.local_storage_signing_secret.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_SIGNING_SECRET is required in production with STORAGE_BACKEND=local"
                    ));
                }
            }
        }

        if self.max_upload_size_bytes <= 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_BYTES must be positive"));
        }
        if self.upload_url_expiry_secs == 0 || self.download_url_expiry_secs == 0 {
            return Err(anyhow::anyhow!("Presigned URL expiry must be at least one second"));
        }
        if self.job_queue_max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_WORKERS must be at least 1"));
        }
        if self.transcode_rate_limit <= 0.0 {
            return Err(anyhow::anyhow!("TRANSCODE_RATE_LIMIT must be positive"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    /// Upload URL lifetime, clamped to the presigning limit.
    pub fn upload_url_expiry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upload_url_expiry_secs.min(MAX_PRESIGNED_EXPIRY_SECS))
    }

    pub fn download_url_expiry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.download_url_expiry_secs.min(MAX_PRESIGNED_EXPIRY_SECS),
        )
    }
}
