use assetflow_core::models::{Asset, Checksum};
use assetflow_core::Transition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::rows::{
    assets_from_rows, insert_job, insert_versions, is_checksum_violation, ledger, load_ledgers,
    lock_job, update_job, ASSET_COLUMNS,
};
use super::transaction::TransactionGuard;
use crate::error::{StoreError, StoreResult};
use crate::store::{apply_finish, ledger_extends, AssetFilter, AssetStore, Committed, Counter};

/// Channel notified whenever a commit enqueues jobs.
pub const JOB_NOTIFY_CHANNEL: &str = "assetflow_new_job";

#[derive(Clone)]
pub struct PgAssetStore {
    pool: PgPool,
}

impl PgAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_ledger(
        conn: &mut PgConnection,
        row: Option<sqlx::postgres::PgRow>,
    ) -> StoreResult<Option<Asset>> {
        match row {
            Some(row) => Ok(assets_from_rows(conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn duplicate_of(&self, asset: &Asset) -> StoreResult<StoreError> {
        let existing = self
            .find_active_by_checksum(asset.organization_id, &asset.checksum)
            .await?;
        Ok(match existing {
            Some(existing) => StoreError::Duplicate {
                existing_id: existing.id,
            },
            // The conflicting row was deleted in the meantime
            None => StoreError::Conflict(format!(
                "checksum {} was briefly in use, retry",
                asset.checksum
            )),
        })
    }

    /// Write the asset row if its revision still matches.
    ///
    /// Returns the new revision and the current analytics counters.
    async fn write_asset(conn: &mut PgConnection, next: &Asset) -> StoreResult<(i64, i64, i64)> {
        let stored = load_ledgers(&mut *conn, &[next.id])
            .await?
            .remove(&next.id)
            .unwrap_or_default();
        let stored = ledger(next.id, stored)?;
        if !ledger_extends(&stored, &next.versions) {
            return Err(StoreError::Conflict(format!(
                "asset {} version ledger can only be appended to",
                next.id
            )));
        }

        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            UPDATE assets
            SET status = $3,
                latest_version = $4,
                renditions = $5,
                tags = $6,
                metadata = $7,
                custom_metadata = $8,
                access_level = $9,
                processing_error = $10,
                upload_expires_at = $11,
                deleted_at = $12,
                updated_at = $13,
                revision = revision + 1
            WHERE id = $1 AND revision = $2
            RETURNING revision, view_count, download_count
            "#,
        )
        .bind(next.id)
        .bind(next.revision)
        .bind(next.status.as_str())
        .bind(next.versions.latest_version())
        .bind(Json(&next.renditions))
        .bind(&next.tags)
        .bind(Json(&next.metadata))
        .bind(Json(&next.custom_metadata))
        .bind(next.access_level.as_str())
        .bind(next.processing_error.as_ref().map(Json))
        .bind(next.upload_expires_at)
        .bind(next.deleted_at)
        .bind(next.updated_at)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(written) = row else {
            return Err(StoreError::Conflict(format!(
                "asset {} changed since revision {}",
                next.id, next.revision
            )));
        };

        insert_versions(&mut *conn, next.id, next.versions.iter().skip(stored.len())).await?;
        Ok(written)
    }
}

#[async_trait]
impl AssetStore for PgAssetStore {
    #[tracing::instrument(skip(self, asset), fields(asset.id = %asset.id))]
    async fn insert_asset(&self, asset: &Asset) -> StoreResult<Asset> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO assets (
                id, organization_id, project_id, uploader_id, original_filename, mime_type,
                asset_type, file_size, checksum, status, storage_provider, storage_key,
                latest_version, renditions, tags, metadata, custom_metadata, access_level,
                processing_error, upload_expires_at, deleted_at, revision, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(asset.id)
        .bind(asset.organization_id)
        .bind(asset.project_id)
        .bind(asset.uploader_id)
        .bind(&asset.original_filename)
        .bind(&asset.mime_type)
        .bind(asset.asset_type.as_str())
        .bind(asset.file_size)
        .bind(asset.checksum.to_string())
        .bind(asset.status.as_str())
        .bind(asset.storage_provider.as_str())
        .bind(&asset.storage_key)
        .bind(asset.versions.latest_version())
        .bind(Json(&asset.renditions))
        .bind(&asset.tags)
        .bind(Json(&asset.metadata))
        .bind(Json(&asset.custom_metadata))
        .bind(asset.access_level.as_str())
        .bind(asset.processing_error.as_ref().map(Json))
        .bind(asset.upload_expires_at)
        .bind(asset.deleted_at)
        .bind(asset.revision)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&mut **tx)
        .await;

        if let Err(e) = inserted {
            if is_checksum_violation(&e) {
                drop(tx);
                tracing::debug!(checksum = %asset.checksum, "Checksum taken by a concurrent upload");
                return Err(self.duplicate_of(asset).await?);
            }
            return Err(e.into());
        }

        insert_versions(&mut **tx, asset.id, asset.versions.iter()).await?;
        tx.commit().await?;

        tracing::info!(
            asset.id = %asset.id,
            organization_id = %asset.organization_id,
            "Asset inserted"
        );

        self.get_asset(asset.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("asset {}", asset.id)))
    }

    #[tracing::instrument(skip(self))]
    async fn get_asset(&self, asset_id: Uuid) -> StoreResult<Option<Asset>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {} FROM assets WHERE id = $1", ASSET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(asset_id)
            .fetch_optional(&mut *conn)
            .await?;
        Self::with_ledger(&mut conn, row).await
    }

    #[tracing::instrument(skip(self, checksum))]
    async fn find_active_by_checksum(
        &self,
        organization_id: Uuid,
        checksum: &Checksum,
    ) -> StoreResult<Option<Asset>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM assets WHERE organization_id = $1 AND checksum = $2 AND deleted_at IS NULL",
            ASSET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(organization_id)
            .bind(checksum.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        Self::with_ledger(&mut conn, row).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_assets(&self, filter: &AssetFilter) -> StoreResult<Vec<Asset>> {
        let (limit, offset) = filter.bounds();

        let mut sql = format!(
            "SELECT {} FROM assets WHERE organization_id = $1 AND deleted_at IS NULL",
            ASSET_COLUMNS
        );
        let mut bind_count = 2;
        if filter.project_id.is_some() {
            sql.push_str(&format!(" AND project_id = ${}", bind_count));
            bind_count += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${}", bind_count));
            bind_count += 1;
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            bind_count,
            bind_count + 1
        ));

        let mut query = sqlx::query(&sql).bind(filter.organization_id);
        if let Some(project_id) = filter.project_id {
            query = query.bind(project_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }

        let mut conn = self.pool.acquire().await?;
        let rows = query.bind(limit).bind(offset).fetch_all(&mut *conn).await?;
        assets_from_rows(&mut conn, rows).await
    }

    #[tracing::instrument(skip(self, transition), fields(enqueue = transition.enqueue.len()))]
    async fn commit(&self, transition: Transition) -> StoreResult<Committed> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let now = Utc::now();

        if let Some(finish) = &transition.finish_job {
            let mut job = lock_job(&mut **tx, finish.job_id).await?;
            if job.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "job {} is already {}",
                    job.id, job.state
                )));
            }
            apply_finish(&mut job, finish);
            update_job(&mut **tx, &job).await?;
        }

        let asset = match transition.asset {
            Some(mut next) => {
                let (revision, view_count, download_count) =
                    Self::write_asset(&mut **tx, &next).await?;
                next.revision = revision;
                next.view_count = view_count;
                next.download_count = download_count;
                Some(next)
            }
            None => None,
        };

        let mut enqueued = Vec::with_capacity(transition.enqueue.len());
        for new_job in transition.enqueue {
            let job = new_job.into_job(now);
            insert_job(&mut **tx, &job).await?;
            enqueued.push(job);
        }

        if !enqueued.is_empty() {
            // Workers fall back to polling if the notification is lost
            if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
                .bind(JOB_NOTIFY_CHANNEL)
                .execute(&mut **tx)
                .await
            {
                tracing::warn!(error = %e, "Failed to send pg_notify for new jobs");
            }
        }

        tx.commit().await?;

        for job in &enqueued {
            tracing::info!(
                job.id = %job.id,
                asset.id = %job.asset_id,
                job.kind = %job.kind,
                run_at = %job.run_at,
                "Job enqueued"
            );
        }

        Ok(Committed { asset, enqueued })
    }

    #[tracing::instrument(skip(self))]
    async fn increment_counter(&self, asset_id: Uuid, counter: Counter) -> StoreResult<()> {
        let sql = format!(
            "UPDATE assets SET {column} = {column} + 1 WHERE id = $1",
            column = counter.column()
        );
        let result = sqlx::query(&sql).bind(asset_id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("asset {}", asset_id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_expired_uploads(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Asset>> {
        let sql = format!(
            r#"
            SELECT {} FROM assets
            WHERE status = 'uploading'
                AND deleted_at IS NULL
                AND upload_expires_at < $1
            ORDER BY upload_expires_at ASC
            LIMIT $2
            "#,
            ASSET_COLUMNS
        );
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit.max(0))
            .fetch_all(&mut *conn)
            .await?;
        assets_from_rows(&mut conn, rows).await
    }
}
