//! In-process identity store for tests and local development.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::store::{IdentityStore, PrincipalGrants, StoreError};
use crate::models::{
    Account, AccountChanges, AccountFilter, NewPrincipalRecord, Permission, PermissionSet,
    Principal, PrincipalId, Profile, Role, RoleId,
};

#[derive(Default)]
struct State {
    principals: HashMap<PrincipalId, Principal>,
    profiles: HashMap<PrincipalId, Profile>,
    roles: HashMap<RoleId, Role>,
}

impl State {
    fn account(&self, id: PrincipalId) -> Option<Account> {
        let principal = self.principals.get(&id)?.clone();
        let profile = self.profiles.get(&id)?.clone();
        Some(Account { principal, profile })
    }

    fn principal_mut(&mut self, id: PrincipalId) -> Result<&mut Principal, StoreError> {
        self.principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("User".to_string()))
    }

    fn profile_mut(&mut self, id: PrincipalId) -> Result<&mut Profile, StoreError> {
        self.profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("Profile".to_string()))
    }

    fn ensure_roles_exist<'a>(
        &self,
        role_ids: impl IntoIterator<Item = &'a RoleId>,
    ) -> Result<(), StoreError> {
        for role_id in role_ids {
            if !self.roles.contains_key(role_id) {
                return Err(StoreError::NotFound("Role".to_string()));
            }
        }
        Ok(())
    }

    fn email_taken(&self, email: &str, except: Option<PrincipalId>) -> bool {
        self.principals
            .values()
            .any(|p| Some(p.id) != except && p.email.eq_ignore_ascii_case(email))
    }

    fn employee_id_taken(&self, employee_id: Option<&str>, except: Option<PrincipalId>) -> bool {
        let Some(employee_id) = employee_id.map(str::trim).filter(|e| !e.is_empty()) else {
            return false;
        };
        self.profiles.values().any(|profile| {
            Some(profile.principal_id) != except
                && profile.employee_id.as_deref() == Some(employee_id)
        })
    }

    fn active_count(&self) -> u64 {
        self.principals.values().filter(|p| p.is_active).count() as u64
    }
}

/// All records live behind one `RwLock`; each trait call is a single critical
/// section, which gives the same atomicity as a database transaction.
pub struct InMemoryIdentityStore {
    state: RwLock<State>,
    available: AtomicBool,
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a datastore outage: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Insert a principal directly, bypassing quota and password policy. For seeding.
    pub fn seed_principal(&self, principal: Principal) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let profile = Profile::new(principal.id, &Default::default(), principal.created_at);
        state.profiles.insert(principal.id, profile);
        state.principals.insert(principal.id, principal);
        Ok(())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "In-memory identity store unavailable"
            )))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.check_available()?;
        self.state
            .read()
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("Identity store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.check_available()?;
        self.state
            .write()
            .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("Identity store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        Ok(self.read()?.principals.get(&id).cloned())
    }

    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .read()?
            .principals
            .values()
            .find(|p| p.username == username)
            .cloned())
    }

    async fn find_account(&self, id: PrincipalId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.account(id))
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError> {
        let state = self.read()?;
        let mut matching: Vec<&Principal> = state
            .principals
            .values()
            .filter(|p| filter.matches(p))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .filter_map(|p| state.account(p.id))
            .collect())
    }

    async fn active_principal_ids(&self) -> Result<Vec<PrincipalId>, StoreError> {
        Ok(self
            .read()?
            .principals
            .values()
            .filter(|p| p.is_active)
            .map(|p| p.id)
            .collect())
    }

    async fn create_account(
        &self,
        record: NewPrincipalRecord,
        max_active: Option<u64>,
    ) -> Result<Account, StoreError> {
        let mut state = self.write()?;

        if let Some(limit) = max_active {
            if state.active_count() >= limit {
                return Err(StoreError::QuotaExceeded { limit });
            }
        }

        if state.principals.values().any(|p| p.username == record.username) {
            return Err(StoreError::Conflict("Username".to_string()));
        }
        if state.email_taken(&record.email, None) {
            return Err(StoreError::Conflict("Email".to_string()));
        }
        if state.employee_id_taken(record.profile.employee_id.as_deref(), None) {
            return Err(StoreError::Conflict("Employee id".to_string()));
        }
        state.ensure_roles_exist(&record.role_ids)?;

        let id = PrincipalId::new();
        let principal = Principal {
            id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            password_hash: record.password_hash,
            is_active: record.is_active,
            is_superuser: record.is_superuser,
            roles: record.role_ids.into_iter().collect(),
            direct_permissions: PermissionSet::new(),
            created_at: record.created_at,
            last_login: None,
        };
        let profile = Profile::new(id, &record.profile, record.created_at);

        state.principals.insert(id, principal.clone());
        state.profiles.insert(id, profile.clone());

        Ok(Account { principal, profile })
    }

    async fn update_account(
        &self,
        id: PrincipalId,
        changes: &AccountChanges,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut state = self.write()?;

        if !state.principals.contains_key(&id) {
            return Err(StoreError::NotFound("User".to_string()));
        }
        if let Some(email) = &changes.email {
            if state.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict("Email".to_string()));
            }
        }
        if state.employee_id_taken(changes.profile.employee_id.as_deref(), Some(id)) {
            return Err(StoreError::Conflict("Employee id".to_string()));
        }
        if let Some(role_ids) = &changes.role_ids {
            state.ensure_roles_exist(role_ids)?;
        }

        let principal = state.principal_mut(id)?;
        if let Some(email) = &changes.email {
            principal.email = email.trim().to_lowercase();
        }
        if let Some(first_name) = &changes.first_name {
            principal.first_name = first_name.clone();
        }
        if let Some(last_name) = &changes.last_name {
            principal.last_name = last_name.clone();
        }
        if let Some(is_active) = changes.is_active {
            principal.is_active = is_active;
        }
        if let Some(role_ids) = &changes.role_ids {
            principal.roles = role_ids.iter().copied().collect::<BTreeSet<_>>();
        }

        state.profile_mut(id)?.apply(&changes.profile, now);

        state
            .account(id)
            .ok_or_else(|| StoreError::NotFound("User".to_string()))
    }

    async fn soft_delete_account(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        if !state.profiles.contains_key(&id) {
            return Err(StoreError::NotFound("User".to_string()));
        }

        state.principal_mut(id)?.is_active = false;
        let profile = state.profile_mut(id)?;
        profile.deleted_at = Some(now);
        profile.updated_at = now;

        state
            .account(id)
            .ok_or_else(|| StoreError::NotFound("User".to_string()))
    }

    async fn restore_profile(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        let mut state = self.write()?;
        let profile = state.profile_mut(id)?;
        profile.deleted_at = None;
        profile.updated_at = now;
        Ok(profile.clone())
    }

    async fn set_password_hash(&self, id: PrincipalId, hash: &str) -> Result<(), StoreError> {
        self.write()?.principal_mut(id)?.password_hash = hash.to_string();
        Ok(())
    }

    async fn record_login(&self, id: PrincipalId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write()?.principal_mut(id)?.last_login = Some(at);
        Ok(())
    }

    async fn add_role_member(&self, id: PrincipalId, role_id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.ensure_roles_exist([&role_id])?;
        state.principal_mut(id)?.roles.insert(role_id);
        Ok(())
    }

    async fn remove_role_member(
        &self,
        id: PrincipalId,
        role_id: RoleId,
    ) -> Result<(), StoreError> {
        self.write()?.principal_mut(id)?.roles.remove(&role_id);
        Ok(())
    }

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError> {
        self.write()?
            .principal_mut(id)?
            .direct_permissions
            .insert(permission.clone());
        Ok(())
    }

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError> {
        self.write()?
            .principal_mut(id)?
            .direct_permissions
            .remove(permission);
        Ok(())
    }

    async fn load_grants(&self, id: PrincipalId) -> Result<Option<PrincipalGrants>, StoreError> {
        let state = self.read()?;
        let Some(principal) = state.principals.get(&id) else {
            return Ok(None);
        };

        Ok(Some(PrincipalGrants {
            direct: principal.direct_permissions.clone(),
            roles: principal
                .roles
                .iter()
                .filter_map(|role_id| state.roles.get(role_id).cloned())
                .collect(),
        }))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self.read()?.roles.values().cloned().collect())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|role| role.name == name)
            .cloned())
    }

    async fn create_role(&self, role: Role) -> Result<Role, StoreError> {
        let mut state = self.write()?;
        if state.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict("Role".to_string()));
        }
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn set_role_permissions(
        &self,
        id: RoleId,
        permissions: &PermissionSet,
    ) -> Result<Role, StoreError> {
        let mut state = self.write()?;
        let role = state
            .roles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("Role".to_string()))?;
        role.permissions = permissions.clone();
        Ok(role.clone())
    }

    async fn delete_role(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError> {
        let mut state = self.write()?;
        if state.roles.remove(&id).is_none() {
            return Err(StoreError::NotFound("Role".to_string()));
        }

        let mut holders = Vec::new();
        for principal in state.principals.values_mut() {
            if principal.roles.remove(&id) {
                holders.push(principal.id);
            }
        }
        Ok(holders)
    }

    async fn role_members(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError> {
        let state = self.read()?;
        if !state.roles.contains_key(&id) {
            return Err(StoreError::NotFound("Role".to_string()));
        }
        Ok(state
            .principals
            .values()
            .filter(|p| p.holds_role(id))
            .map(|p| p.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileFields;
    use std::sync::Arc;

    fn record(username: &str) -> NewPrincipalRecord {
        NewPrincipalRecord {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "$argon2id$placeholder".to_string(),
            is_active: true,
            is_superuser: false,
            role_ids: vec![],
            profile: ProfileFields::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let store = InMemoryIdentityStore::new();
        store.create_account(record("alice"), None).await.unwrap();

        let dup_username = store.create_account(record("alice"), None).await;
        assert!(matches!(dup_username, Err(StoreError::Conflict(ref what)) if what == "Username"));

        let mut dup_email = record("alice2");
        dup_email.email = "ALICE@example.com".to_string();
        assert!(matches!(
            store.create_account(dup_email, None).await,
            Err(StoreError::Conflict(ref what)) if what == "Email"
        ));
    }

    #[tokio::test]
    async fn test_employee_id_unique_when_set() {
        let store = InMemoryIdentityStore::new();
        let mut first = record("alice");
        first.profile.employee_id = Some("EMP001".to_string());
        store.create_account(first, None).await.unwrap();

        store.create_account(record("bob"), None).await.unwrap();
        store.create_account(record("carol"), None).await.unwrap();

        let mut clash = record("dave");
        clash.profile.employee_id = Some("EMP001".to_string());
        assert!(matches!(
            store.create_account(clash, None).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_role_rejects_whole_create() {
        let store = InMemoryIdentityStore::new();
        let mut with_role = record("alice");
        with_role.role_ids = vec![RoleId::new()];

        assert!(matches!(
            store.create_account(with_role, None).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.find_principal_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_overshoot_quota() {
        let store = Arc::new(InMemoryIdentityStore::new());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_account(record(&format!("user{}", i)), Some(5)).await
            }));
        }

        let mut created = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::QuotaExceeded { limit: 5 }) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(created, 5);
        assert_eq!(refused, 15);
    }

    #[tokio::test]
    async fn test_delete_role_returns_former_holders() {
        let store = InMemoryIdentityStore::new();
        let role = store
            .create_role(Role::new("Viewers".to_string(), PermissionSet::new(), Utc::now()))
            .await
            .unwrap();

        let mut holder = record("alice");
        holder.role_ids = vec![role.id];
        let alice = store.create_account(holder, None).await.unwrap();
        store.create_account(record("bob"), None).await.unwrap();

        let holders = store.delete_role(role.id).await.unwrap();
        assert_eq!(holders, vec![alice.principal.id]);

        let alice = store.find_principal(alice.principal.id).await.unwrap().unwrap();
        assert!(alice.roles.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryIdentityStore::new();
        store.set_available(false);
        assert!(matches!(
            store.find_principal(PrincipalId::new()).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
