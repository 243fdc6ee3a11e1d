//! Account lifecycle: create, update, soft-delete and grant management.
//!
//! Every operation opens with its authorization check. Self-protection rules
//! (no self-deactivation, self-deletion or self-demotion) are evaluated first,
//! so they hold for every caller including superusers.

use std::sync::Arc;

use validator::Validate;

use super::clock::Clock;
use super::credentials::CredentialVerifier;
use super::error::AuthError;
use super::gate::AuthorizationGate;
use super::permissions::{EffectiveAccess, PermissionResolver};
use super::store::IdentityStore;
use crate::config::AccountPolicy;
use crate::models::{
    Account, AccountChanges, AccountFilter, AccountResponse, AccountStats, NewAccount,
    NewPrincipalRecord, Operation, Permission, Principal, PrincipalId, Profile, RoleId,
};

pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    credentials: Arc<CredentialVerifier>,
    resolver: Arc<PermissionResolver>,
    gate: Arc<AuthorizationGate>,
    policy: AccountPolicy,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        credentials: Arc<CredentialVerifier>,
        resolver: Arc<PermissionResolver>,
        gate: Arc<AuthorizationGate>,
        policy: AccountPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            resolver,
            gate,
            policy,
            clock,
        }
    }

    /// Create a principal and its profile in one unit, subject to the active-account ceiling.
    pub async fn create(&self, requester: &Principal, input: NewAccount) -> Result<Account, AuthError> {
        self.gate.require(requester, Operation::CreateAccount).await?;
        let input = input.normalized();
        input.validate()?;

        let password_hash = self
            .credentials
            .hash_new_password(&input.username, &input.password)?;

        let record = NewPrincipalRecord {
            username: input.username,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            password_hash: password_hash.into_string(),
            is_active: input.is_active,
            is_superuser: false,
            role_ids: input.role_ids,
            profile: input.profile,
            created_at: self.clock.now(),
        };

        let account = self
            .store
            .create_account(record, self.policy.max_active_accounts)
            .await
            .map_err(|e| {
                tracing::warn!(requested_by = %requester.id, error = %e, "Account creation refused");
                AuthError::from(e)
            })?;

        tracing::info!(
            user_id = %account.principal.id,
            created_by = %requester.id,
            "Account created"
        );
        Ok(account)
    }

    pub async fn update(
        &self,
        requester: &Principal,
        target: PrincipalId,
        changes: AccountChanges,
    ) -> Result<Account, AuthError> {
        if requester.id == target {
            if changes.deactivates() {
                return Err(AuthError::SelfDeactivation);
            }
            if let Some(role_ids) = &changes.role_ids {
                let current = self.load_principal(target).await?;
                if let Some(admin_role) = self.admin_role_id().await? {
                    if current.holds_role(admin_role) && !role_ids.contains(&admin_role) {
                        return Err(AuthError::SelfDemotion);
                    }
                }
            }
        }

        self.gate.require(requester, Operation::UpdateAccount).await?;
        changes.validate()?;

        let account = self
            .store
            .update_account(target, &changes, self.clock.now())
            .await?;

        if changes.role_ids.is_some() {
            self.resolver.invalidate(target).await?;
        }

        tracing::info!(user_id = %target, updated_by = %requester.id, "Account updated");
        Ok(account)
    }

    /// Soft delete: deactivate and stamp `deleted_at`. The record stays retrievable.
    pub async fn delete(&self, requester: &Principal, target: PrincipalId) -> Result<Account, AuthError> {
        if requester.id == target {
            return Err(AuthError::SelfDeletion);
        }

        self.gate.require(requester, Operation::DeleteAccount).await?;

        let account = self
            .store
            .soft_delete_account(target, self.clock.now())
            .await?;
        self.resolver.invalidate(target).await?;

        tracing::info!(user_id = %target, deleted_by = %requester.id, "Account soft-deleted");
        Ok(account)
    }

    /// Viewers see any account; everyone else only their own. Other ids are `NotFound`.
    pub async fn get(&self, requester: &Principal, id: PrincipalId) -> Result<Account, AuthError> {
        if requester.id != id && !self.may(requester, Operation::ViewAccount).await? {
            return Err(AuthError::NotFound("User".to_string()));
        }

        self.store
            .find_account(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    pub async fn list(&self, requester: &Principal, filter: &AccountFilter) -> Result<Vec<Account>, AuthError> {
        if self.may(requester, Operation::ListAccounts).await? {
            return Ok(self.store.list_accounts(filter).await?);
        }

        let own = self.store.find_account(requester.id).await?;
        Ok(own
            .into_iter()
            .filter(|account| filter.matches(&account.principal))
            .collect())
    }

    pub async fn current(&self, principal: &Principal) -> Result<Account, AuthError> {
        self.gate.require(principal, Operation::CurrentAccount).await?;
        self.store
            .find_account(principal.id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    pub async fn change_own_password(
        &self,
        principal: &Principal,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.gate
            .require(principal, Operation::ChangeOwnPassword)
            .await?;
        self.credentials
            .change_password(principal, old_password, new_password)
            .await
    }

    /// Administrative reset without the old password. Not available for one's own account.
    pub async fn reset_password(
        &self,
        requester: &Principal,
        target: PrincipalId,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if requester.id == target {
            return Err(AuthError::Validation(
                "Use change_own_password to change your own password".to_string(),
            ));
        }

        self.gate.require(requester, Operation::ResetPassword).await?;

        let principal = self.load_principal(target).await?;
        self.credentials
            .set_password(principal.id, &principal.username, new_password)
            .await?;

        tracing::info!(user_id = %target, reset_by = %requester.id, "Password reset");
        Ok(())
    }

    pub async fn assign_role(
        &self,
        requester: &Principal,
        target: PrincipalId,
        role_id: RoleId,
    ) -> Result<(), AuthError> {
        self.gate.require(requester, Operation::AssignRole).await?;

        self.store.add_role_member(target, role_id).await?;
        self.resolver.invalidate(target).await?;

        tracing::info!(user_id = %target, role_id = %role_id, "Role assigned");
        Ok(())
    }

    pub async fn remove_role(
        &self,
        requester: &Principal,
        target: PrincipalId,
        role_id: RoleId,
    ) -> Result<(), AuthError> {
        if requester.id == target && self.admin_role_id().await? == Some(role_id) {
            let current = self.load_principal(target).await?;
            if current.holds_role(role_id) {
                return Err(AuthError::SelfDemotion);
            }
        }

        self.gate.require(requester, Operation::RemoveRole).await?;

        self.store.remove_role_member(target, role_id).await?;
        self.resolver.invalidate(target).await?;

        tracing::info!(user_id = %target, role_id = %role_id, "Role removed");
        Ok(())
    }

    pub async fn grant_permission(
        &self,
        requester: &Principal,
        target: PrincipalId,
        key: &str,
    ) -> Result<(), AuthError> {
        self.gate.require(requester, Operation::GrantPermission).await?;
        let permission = parse_permission(key)?;

        self.store.grant_permission(target, &permission).await?;
        self.resolver.invalidate(target).await?;

        tracing::info!(user_id = %target, permission = %permission, "Permission granted");
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        requester: &Principal,
        target: PrincipalId,
        key: &str,
    ) -> Result<(), AuthError> {
        self.gate.require(requester, Operation::RevokePermission).await?;
        let permission = parse_permission(key)?;

        self.store.revoke_permission(target, &permission).await?;
        self.resolver.invalidate(target).await?;

        tracing::info!(user_id = %target, permission = %permission, "Permission revoked");
        Ok(())
    }

    /// Clear the profile's deletion stamp. The principal stays inactive.
    pub async fn restore_profile(
        &self,
        requester: &Principal,
        target: PrincipalId,
    ) -> Result<Profile, AuthError> {
        self.gate.require(requester, Operation::RestoreProfile).await?;

        let profile = self
            .store
            .restore_profile(target, self.clock.now())
            .await?;

        tracing::info!(user_id = %target, restored_by = %requester.id, "Profile restored");
        Ok(profile)
    }

    pub async fn effective_access(
        &self,
        requester: &Principal,
        target: PrincipalId,
    ) -> Result<EffectiveAccess, AuthError> {
        if requester.id != target {
            self.gate
                .require(requester, Operation::ViewEffectiveAccess)
                .await?;
        }

        let principal = self.load_principal(target).await?;
        self.resolver.effective_access(&principal).await
    }

    /// Login activity for an account, with the same visibility as `get`.
    pub async fn stats(&self, requester: &Principal, id: PrincipalId) -> Result<AccountStats, AuthError> {
        let account = self.get(requester, id).await?;
        Ok(AccountStats::at(&account.principal, self.clock.now()))
    }

    /// Response shape with role ids resolved to names.
    pub async fn describe(&self, account: &Account) -> Result<AccountResponse, AuthError> {
        let mut role_names = Vec::with_capacity(account.principal.roles.len());
        for role_id in &account.principal.roles {
            if let Some(role) = self.store.find_role(*role_id).await? {
                role_names.push(role.name);
            }
        }
        role_names.sort();
        Ok(AccountResponse::new(account, role_names))
    }

    /// Like `gate.require`, but a denial is `false`. Store and cache failures still propagate.
    async fn may(&self, requester: &Principal, operation: Operation) -> Result<bool, AuthError> {
        match self.gate.require(requester, operation).await {
            Ok(()) => Ok(true),
            Err(AuthError::PermissionDenied { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn load_principal(&self, id: PrincipalId) -> Result<Principal, AuthError> {
        self.store
            .find_principal(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    async fn admin_role_id(&self) -> Result<Option<RoleId>, AuthError> {
        Ok(self
            .store
            .find_role_by_name(&self.policy.admin_role_name)
            .await?
            .map(|role| role.id))
    }
}

fn parse_permission(key: &str) -> Result<Permission, AuthError> {
    Permission::parse(key)
        .ok_or_else(|| AuthError::Validation(format!("Invalid permission key: {}", key)))
}
