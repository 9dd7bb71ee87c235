//! Lookups of the organizations and projects an asset references.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait ReferenceDirectory: Send + Sync {
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, AppError>;

    /// True when the project exists and belongs to the organization.
    async fn project_in_organization(
        &self,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<bool, AppError>;
}

/// In-memory directory, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    projects: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&self, organization_id: Uuid) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(organization_id).or_default();
        }
    }

    pub fn add_project(&self, organization_id: Uuid, project_id: Uuid) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(organization_id).or_default().insert(project_id);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, HashSet<Uuid>>>, AppError> {
        self.projects
            .read()
            .map_err(|_| AppError::Internal("directory lock poisoned".to_string()))
    }
}

#[async_trait]
impl ReferenceDirectory for StaticDirectory {
    async fn organization_exists(&self, organization_id: Uuid) -> Result<bool, AppError> {
        Ok(self.read()?.contains_key(&organization_id))
    }

    async fn project_in_organization(
        &self,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(self
            .read()?
            .get(&organization_id)
            .map(|projects| projects.contains(&project_id))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticDirectory::new();
        let org = Uuid::new_v4();
        let project = Uuid::new_v4();
        let other_org = Uuid::new_v4();

        assert!(!directory.organization_exists(org).await.unwrap());
        directory.add_project(org, project);
        directory.add_organization(other_org);

        assert!(directory.organization_exists(org).await.unwrap());
        assert!(directory.project_in_organization(org, project).await.unwrap());
        assert!(!directory
            .project_in_organization(other_org, project)
            .await
            .unwrap());
    }
}
