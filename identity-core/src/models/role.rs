//! Role model - named bundles of permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::PermissionSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(Uuid);

impl RoleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RoleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for RoleId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<RoleId> for Uuid {
    fn from(value: RoleId) -> Self {
        value.0
    }
}

/// Role entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String, permissions: PermissionSet, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RoleId::new(),
            name,
            permissions,
            created_at,
        }
    }
}

/// Request to create a role.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 150, message = "Role name must be 1-150 characters"))]
    pub name: String,

    #[serde(default)]
    pub permissions: Vec<String>,
}
