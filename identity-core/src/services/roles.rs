use std::sync::Arc;

use validator::Validate;

use super::clock::Clock;
use super::error::AuthError;
use super::gate::AuthorizationGate;
use super::permissions::PermissionResolver;
use super::store::IdentityStore;
use crate::models::{CreateRoleRequest, Operation, Permission, PermissionSet, Principal, Role, RoleId};

/// Role administration. Changes to a role's grants invalidate every holder.
pub struct RoleService {
    store: Arc<dyn IdentityStore>,
    resolver: Arc<PermissionResolver>,
    gate: Arc<AuthorizationGate>,
    admin_role_name: String,
    clock: Arc<dyn Clock>,
}

impl RoleService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        resolver: Arc<PermissionResolver>,
        gate: Arc<AuthorizationGate>,
        admin_role_name: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            gate,
            admin_role_name,
            clock,
        }
    }

    pub async fn list_roles(&self, requester: &Principal) -> Result<Vec<Role>, AuthError> {
        self.gate.require(requester, Operation::ListRoles).await?;
        let mut roles = self.store.list_roles().await?;
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    pub async fn create_role(
        &self,
        requester: &Principal,
        request: CreateRoleRequest,
    ) -> Result<Role, AuthError> {
        self.gate.require(requester, Operation::ManageRoles).await?;
        request.validate()?;

        let permissions = parse_permissions(&request.permissions)?;
        let role = self
            .store
            .create_role(Role::new(
                request.name.trim().to_string(),
                permissions,
                self.clock.now(),
            ))
            .await?;

        tracing::info!(role_id = %role.id, role = %role.name, "Role created");
        Ok(role)
    }

    /// Replace the role's grants, then invalidate every holder's cache entry.
    pub async fn set_role_permissions(
        &self,
        requester: &Principal,
        role_id: RoleId,
        keys: &[String],
    ) -> Result<Role, AuthError> {
        self.gate.require(requester, Operation::ManageRoles).await?;

        let permissions = parse_permissions(keys)?;
        let role = self
            .store
            .set_role_permissions(role_id, &permissions)
            .await?;
        let invalidated = self.resolver.invalidate_for_role(role_id).await?;

        tracing::info!(role_id = %role_id, invalidated, "Role permissions replaced");
        Ok(role)
    }

    /// Delete the role and revoke it from all holders.
    pub async fn delete_role(&self, requester: &Principal, role_id: RoleId) -> Result<(), AuthError> {
        if requester.holds_role(role_id) {
            let held = self.store.find_role(role_id).await?;
            if held.is_some_and(|role| role.name == self.admin_role_name) {
                return Err(AuthError::SelfDemotion);
            }
        }

        self.gate.require(requester, Operation::ManageRoles).await?;

        let holders = self.store.delete_role(role_id).await?;
        let invalidated = self.resolver.invalidate_all(&holders).await?;

        tracing::info!(role_id = %role_id, invalidated, "Role deleted");
        Ok(())
    }
}

fn parse_permissions(keys: &[String]) -> Result<PermissionSet, AuthError> {
    keys.iter()
        .map(|key| {
            Permission::parse(key.trim())
                .ok_or_else(|| AuthError::Validation(format!("Invalid permission key: {}", key)))
        })
        .collect()
}
