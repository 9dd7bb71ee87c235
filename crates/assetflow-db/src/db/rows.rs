//! Row mapping between PostgreSQL and the core models

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use assetflow_core::models::{
    AccessLevel, Asset, AssetStatus, AssetType, AssetVersion, Checksum, CustomMetadata,
    ExtractedMetadata, JobError, JobKind, JobLogEntry, JobPayload, JobState, Priority,
    ProcessingError, ProcessingJob, RenditionSet, StorageProvider, VersionLedger,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

pub(crate) const ASSET_COLUMNS: &str = r#"
    id, organization_id, project_id, uploader_id, original_filename, mime_type,
    asset_type, file_size, checksum, status, storage_provider, storage_key,
    renditions, tags, metadata, custom_metadata, access_level, view_count,
    download_count, processing_error, upload_expires_at, deleted_at, revision,
    created_at, updated_at
"#;

pub(crate) const JOB_COLUMNS: &str = r#"
    id, asset_id, organization_id, kind, state, priority, payload, attempts,
    max_attempts, worker_id, logs, error, lineage_id, run_at, queued_at,
    started_at, completed_at, duration_ms
"#;

fn parse<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::Database(format!("invalid {} value {:?}: {}", column, raw, e)))
}

pub(crate) fn version_from_row(row: &PgRow) -> StoreResult<AssetVersion> {
    Ok(AssetVersion {
        version: row.try_get("version")?,
        storage_key: row.try_get("storage_key")?,
        size: row.try_get("size")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn ledger(asset_id: Uuid, entries: Vec<AssetVersion>) -> StoreResult<VersionLedger> {
    VersionLedger::from_entries(entries).map_err(|e| {
        StoreError::Database(format!("asset {} has an invalid version ledger: {}", asset_id, e))
    })
}

pub(crate) fn asset_from_row(row: &PgRow, versions: VersionLedger) -> StoreResult<Asset> {
    Ok(Asset {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        project_id: row.try_get("project_id")?,
        uploader_id: row.try_get("uploader_id")?,
        original_filename: row.try_get("original_filename")?,
        mime_type: row.try_get("mime_type")?,
        asset_type: parse::<AssetType>(row, "asset_type")?,
        file_size: row.try_get("file_size")?,
        checksum: parse::<Checksum>(row, "checksum")?,
        status: parse::<AssetStatus>(row, "status")?,
        storage_provider: parse::<StorageProvider>(row, "storage_provider")?,
        storage_key: row.try_get("storage_key")?,
        versions,
        renditions: row.try_get::<Json<RenditionSet>, _>("renditions")?.0,
        tags: row.try_get("tags")?,
        metadata: row.try_get::<Json<ExtractedMetadata>, _>("metadata")?.0,
        custom_metadata: row.try_get::<Json<CustomMetadata>, _>("custom_metadata")?.0,
        access_level: parse::<AccessLevel>(row, "access_level")?,
        view_count: row.try_get("view_count")?,
        download_count: row.try_get("download_count")?,
        processing_error: row
            .try_get::<Option<Json<ProcessingError>>, _>("processing_error")?
            .map(|j| j.0),
        upload_expires_at: row.try_get("upload_expires_at")?,
        deleted_at: row.try_get("deleted_at")?,
        revision: row.try_get("revision")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn job_from_row(row: &PgRow) -> StoreResult<ProcessingJob> {
    Ok(ProcessingJob {
        id: row.try_get("id")?,
        asset_id: row.try_get("asset_id")?,
        organization_id: row.try_get("organization_id")?,
        kind: parse::<JobKind>(row, "kind")?,
        state: parse::<JobState>(row, "state")?,
        priority: Priority::from_i32(row.try_get("priority")?),
        payload: row.try_get::<Json<JobPayload>, _>("payload")?.0,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        worker_id: row.try_get("worker_id")?,
        logs: row.try_get::<Json<Vec<JobLogEntry>>, _>("logs")?.0,
        error: row.try_get::<Option<Json<JobError>>, _>("error")?.map(|j| j.0),
        lineage_id: row.try_get("lineage_id")?,
        run_at: row.try_get("run_at")?,
        queued_at: row.try_get("queued_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

/// Load the ledgers of several assets in one query.
pub(crate) async fn load_ledgers(
    conn: &mut PgConnection,
    asset_ids: &[Uuid],
) -> StoreResult<HashMap<Uuid, Vec<AssetVersion>>> {
    let rows = sqlx::query(
        r#"
        SELECT asset_id, version, storage_key, size, created_by, created_at
        FROM asset_versions
        WHERE asset_id = ANY($1)
        ORDER BY asset_id, version
        "#,
    )
    .bind(asset_ids)
    .fetch_all(conn)
    .await?;

    let mut ledgers: HashMap<Uuid, Vec<AssetVersion>> = HashMap::new();
    for row in &rows {
        let asset_id: Uuid = row.try_get("asset_id")?;
        ledgers
            .entry(asset_id)
            .or_default()
            .push(version_from_row(row)?);
    }
    Ok(ledgers)
}

/// Attach ledgers to asset rows, preserving row order.
pub(crate) async fn assets_from_rows(
    conn: &mut PgConnection,
    rows: Vec<PgRow>,
) -> StoreResult<Vec<Asset>> {
    let ids = rows
        .iter()
        .map(|r| r.try_get::<Uuid, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    let mut ledgers = load_ledgers(conn, &ids).await?;
    rows.iter()
        .zip(ids)
        .map(|(row, id)| {
            let entries = ledgers.remove(&id).unwrap_or_default();
            asset_from_row(row, ledger(id, entries)?)
        })
        .collect()
}

pub(crate) async fn insert_versions<'v>(
    conn: &mut PgConnection,
    asset_id: Uuid,
    versions: impl IntoIterator<Item = &'v AssetVersion>,
) -> StoreResult<()> {
    for version in versions {
        sqlx::query(
            r#"
            INSERT INTO asset_versions (asset_id, version, storage_key, size, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(asset_id)
        .bind(version.version)
        .bind(&version.storage_key)
        .bind(version.size)
        .bind(version.created_by)
        .bind(version.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn insert_job(conn: &mut PgConnection, job: &ProcessingJob) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO processing_jobs (
            id, asset_id, organization_id, kind, state, priority, payload, attempts,
            max_attempts, worker_id, logs, error, lineage_id, run_at, queued_at,
            started_at, completed_at, duration_ms
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(job.id)
    .bind(job.asset_id)
    .bind(job.organization_id)
    .bind(job.kind.as_str())
    .bind(job.state.as_str())
    .bind(job.priority.as_i32())
    .bind(Json(&job.payload))
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(&job.worker_id)
    .bind(Json(&job.logs))
    .bind(job.error.as_ref().map(Json))
    .bind(job.lineage_id)
    .bind(job.run_at)
    .bind(job.queued_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.duration_ms)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write back every field a job can change after insertion.
pub(crate) async fn update_job(conn: &mut PgConnection, job: &ProcessingJob) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE processing_jobs
        SET state = $2,
            attempts = $3,
            worker_id = $4,
            logs = $5,
            error = $6,
            run_at = $7,
            started_at = $8,
            completed_at = $9,
            duration_ms = $10
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(job.state.as_str())
    .bind(job.attempts)
    .bind(&job.worker_id)
    .bind(Json(&job.logs))
    .bind(job.error.as_ref().map(Json))
    .bind(job.run_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.duration_ms)
    .execute(conn)
    .await?;
    Ok(())
}

/// Lock a job row for the rest of the transaction.
pub(crate) async fn lock_job(
    conn: &mut PgConnection,
    job_id: Uuid,
) -> StoreResult<ProcessingJob> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM processing_jobs WHERE id = $1 FOR UPDATE",
        JOB_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
    job_from_row(&row)
}

/// Map a unique-index violation on the active checksum index to `Duplicate`.
pub(crate) fn is_checksum_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(ACTIVE_CHECKSUM_INDEX)
        }
        _ => false,
    }
}

pub(crate) const ACTIVE_CHECKSUM_INDEX: &str = "assets_active_checksum_idx";
