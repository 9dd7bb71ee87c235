//! Caller identity and the access policy consulted by the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccessLevel, Asset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
    /// Internal service account
    Service,
}

impl Role {
    fn is_privileged(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin | Role::Service)
    }
}

/// Authenticated principal on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            organization_id,
            role,
        }
    }

    fn owns(&self, asset: &Asset) -> bool {
        self.organization_id == asset.organization_id && self.user_id == asset.uploader_id
    }

    fn is_privileged_in(&self, organization_id: Uuid) -> bool {
        self.organization_id == organization_id && self.role.is_privileged()
    }
}

pub trait AccessPolicy: Send + Sync {
    fn can_upload(&self, caller: &Caller, organization_id: Uuid) -> bool;
    fn can_finalize(&self, caller: &Caller, asset: &Asset) -> bool;
    fn can_delete(&self, caller: &Caller, asset: &Asset) -> bool;
    fn can_edit_metadata(&self, caller: &Caller, asset: &Asset) -> bool;
    fn can_view(&self, caller: &Caller, asset: &Asset) -> bool;
}

/// Role-based policy scoped to the caller's organization.
///
/// Owners, admins and service accounts may do anything inside their
/// organization. Members may upload and manage the assets they uploaded.
/// Viewers may only read. Public assets are readable by anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAccessPolicy;

impl AccessPolicy for DefaultAccessPolicy {
    fn can_upload(&self, caller: &Caller, organization_id: Uuid) -> bool {
        caller.organization_id == organization_id && caller.role != Role::Viewer
    }

    fn can_finalize(&self, caller: &Caller, asset: &Asset) -> bool {
        caller.is_privileged_in(asset.organization_id) || caller.owns(asset)
    }

    fn can_delete(&self, caller: &Caller, asset: &Asset) -> bool {
        caller.is_privileged_in(asset.organization_id)
            || (caller.owns(asset) && caller.role == Role::Member)
    }

    fn can_edit_metadata(&self, caller: &Caller, asset: &Asset) -> bool {
        caller.is_privileged_in(asset.organization_id)
            || (caller.owns(asset) && caller.role == Role::Member)
    }

    fn can_view(&self, caller: &Caller, asset: &Asset) -> bool {
        match asset.access_level {
            AccessLevel::Public => true,
            AccessLevel::Organization => caller.organization_id == asset.organization_id,
            AccessLevel::Private => caller.is_privileged_in(asset.organization_id) || caller.owns(asset),
        }
    }
}
