//! Identity store contract: durable principals, profiles and roles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Account, AccountChanges, AccountFilter, NewPrincipalRecord, Permission, PermissionSet,
    Principal, PrincipalId, Profile, Role, RoleId,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Active account limit reached ({limit})")]
    QuotaExceeded { limit: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Raw inputs of the effective-permission computation.
#[derive(Debug, Clone, Default)]
pub struct PrincipalGrants {
    pub direct: PermissionSet,
    pub roles: Vec<Role>,
}

impl PrincipalGrants {
    /// Direct grants plus the grants of every held role.
    pub fn effective(&self) -> PermissionSet {
        let mut effective = self.direct.clone();
        for role in &self.roles {
            effective.extend(role.permissions.iter().cloned());
        }
        effective
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError>;

    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, StoreError>;

    async fn find_account(&self, id: PrincipalId) -> Result<Option<Account>, StoreError>;

    /// Newest first.
    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError>;

    async fn active_principal_ids(&self) -> Result<Vec<PrincipalId>, StoreError>;

    /// Create principal, profile and initial role memberships as one unit.
    ///
    /// With `max_active` set, the active-principal count is checked inside the
    /// same critical section as the insert, so concurrent creates cannot
    /// overshoot the ceiling.
    async fn create_account(
        &self,
        record: NewPrincipalRecord,
        max_active: Option<u64>,
    ) -> Result<Account, StoreError>;

    async fn update_account(
        &self,
        id: PrincipalId,
        changes: &AccountChanges,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Deactivate the principal and stamp the profile's `deleted_at` in one unit.
    async fn soft_delete_account(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    async fn restore_profile(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError>;

    async fn set_password_hash(&self, id: PrincipalId, hash: &str) -> Result<(), StoreError>;

    async fn record_login(&self, id: PrincipalId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn add_role_member(&self, id: PrincipalId, role_id: RoleId) -> Result<(), StoreError>;

    async fn remove_role_member(&self, id: PrincipalId, role_id: RoleId)
    -> Result<(), StoreError>;

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError>;

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError>;

    async fn load_grants(&self, id: PrincipalId) -> Result<Option<PrincipalGrants>, StoreError>;

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    async fn create_role(&self, role: Role) -> Result<Role, StoreError>;

    async fn set_role_permissions(
        &self,
        id: RoleId,
        permissions: &PermissionSet,
    ) -> Result<Role, StoreError>;

    /// Delete a role, revoking it from every holder. Returns the former holders.
    async fn delete_role(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError>;

    async fn role_members(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError>;
}
