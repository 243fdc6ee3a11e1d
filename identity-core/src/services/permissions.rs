//! Effective-permission resolution with a cache-aside layer.
//!
//! Entries live under `user_permissions:{principal_id}` as a JSON array of
//! permission keys. Reads fall back to the identity store on any cache
//! problem; invalidations must reach the cache or the mutating call fails.

use std::sync::Arc;

use serde::Serialize;

use super::cache::KeyValueCache;
use super::error::AuthError;
use super::store::IdentityStore;
use crate::models::{Permission, PermissionSet, Principal, PrincipalId, RoleId};

pub fn cache_key(principal_id: PrincipalId) -> String {
    format!("user_permissions:{}", principal_id)
}

/// Summary of what a principal can do, for display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EffectiveAccess {
    pub permissions: PermissionSet,
    pub roles: Vec<String>,
    pub is_superuser: bool,
}

pub struct PermissionResolver {
    store: Arc<dyn IdentityStore>,
    cache: Arc<dyn KeyValueCache>,
    ttl_seconds: u64,
}

impl PermissionResolver {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        cache: Arc<dyn KeyValueCache>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            cache,
            ttl_seconds,
        }
    }

    pub async fn resolve(&self, principal_id: PrincipalId) -> Result<PermissionSet, AuthError> {
        let key = cache_key(principal_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Permission>>(&raw) {
                Ok(permissions) => {
                    tracing::debug!(user_id = %principal_id, "Permission cache hit");
                    return Ok(permissions.into_iter().collect());
                }
                Err(e) => {
                    tracing::warn!(user_id = %principal_id, error = %e, "Discarding undecodable permission cache entry");
                }
            },
            Ok(None) => {
                tracing::debug!(user_id = %principal_id, "Permission cache miss");
            }
            Err(e) => {
                tracing::warn!(user_id = %principal_id, error = %e, "Permission cache read failed, recomputing");
            }
        }

        let permissions = self.compute(principal_id).await?;
        self.populate(principal_id, &permissions).await;
        Ok(permissions)
    }

    pub async fn invalidate(&self, principal_id: PrincipalId) -> Result<(), AuthError> {
        self.cache
            .delete(&cache_key(principal_id))
            .await
            .map_err(|e| {
                tracing::error!(user_id = %principal_id, error = %e, "Permission cache invalidation failed");
                AuthError::Cache(e)
            })?;

        tracing::info!(user_id = %principal_id, "Permission cache invalidated");
        Ok(())
    }

    /// Invalidate every current holder of the role. Returns how many entries were dropped.
    pub async fn invalidate_for_role(&self, role_id: RoleId) -> Result<usize, AuthError> {
        let holders = self.store.role_members(role_id).await?;
        self.invalidate_all(&holders).await
    }

    pub async fn invalidate_all(&self, principal_ids: &[PrincipalId]) -> Result<usize, AuthError> {
        for principal_id in principal_ids {
            self.invalidate(*principal_id).await?;
        }
        Ok(principal_ids.len())
    }

    /// Pre-populate entries for the given principals, or every active one.
    pub async fn warm_up(&self, principal_ids: Option<Vec<PrincipalId>>) -> Result<usize, AuthError> {
        let principal_ids = match principal_ids {
            Some(ids) => ids,
            None => self.store.active_principal_ids().await?,
        };

        let mut warmed = 0;
        for principal_id in principal_ids {
            match self.compute(principal_id).await {
                Ok(permissions) => {
                    self.populate(principal_id, &permissions).await;
                    warmed += 1;
                }
                Err(AuthError::NotFound(_)) => {
                    tracing::debug!(user_id = %principal_id, "Skipping unknown principal during warm-up");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(count = warmed, "Permission cache warm-up completed");
        Ok(warmed)
    }

    pub async fn effective_access(&self, principal: &Principal) -> Result<EffectiveAccess, AuthError> {
        let permissions = self.resolve(principal.id).await?;

        let mut roles = Vec::with_capacity(principal.roles.len());
        for role_id in &principal.roles {
            if let Some(role) = self.store.find_role(*role_id).await? {
                roles.push(role.name);
            }
        }
        roles.sort();

        Ok(EffectiveAccess {
            permissions,
            roles,
            is_superuser: principal.is_superuser,
        })
    }

    async fn compute(&self, principal_id: PrincipalId) -> Result<PermissionSet, AuthError> {
        let grants = self
            .store
            .load_grants(principal_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;
        Ok(grants.effective())
    }

    /// Write failures are logged, never returned.
    async fn populate(&self, principal_id: PrincipalId, permissions: &PermissionSet) {
        let raw = match serde_json::to_string(permissions) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(user_id = %principal_id, error = %e, "Failed to encode permission set");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set(&cache_key(principal_id), &raw, self.ttl_seconds)
            .await
        {
            tracing::warn!(user_id = %principal_id, error = %e, "Failed to populate permission cache");
        }
    }
}
