use assetflow_core::{AppError, ReferenceDirectory};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Reference lookups against the `organizations` and `projects` tables.
#[derive(Clone)]
pub struct PgReferenceDirectory {
    pool: PgPool,
}

impl PgReferenceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceDirectory for PgReferenceDirectory {
    #[tracing::instrument(skip(self))]
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM organizations WHERE id = $1)")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self))]
    async fn project_in_organization(
        &self,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1 AND organization_id = $2)",
        )
        .bind(project_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(exists)
    }
}
