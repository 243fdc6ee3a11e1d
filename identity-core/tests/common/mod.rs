//! Common fixtures for identity-core integration tests.
//!
//! Everything runs against the in-memory store and cache on a manual clock,
//! so no external services are needed.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Once, OnceLock};

use chrono::{DateTime, TimeZone, Utc};
use identity_core::config::IdentityConfig;
use identity_core::models::{Permission, PermissionSet, Principal, PrincipalId, Role, RoleId};
use identity_core::services::{IdentityStore, InMemoryIdentityStore, ManualClock, MemoryCache};
use identity_core::utils::{Password, hash_password};
use identity_core::{IdentityCore, InMemoryIdentity};

pub const SECRET: &str = "integration-test-signing-secret-0123456789";
pub const PASSWORD: &str = "correct-horse-battery";

pub struct TestContext {
    pub identity: IdentityCore,
    pub store: Arc<InMemoryIdentityStore>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
}

pub fn config() -> IdentityConfig {
    IdentityConfig::with_secret(SECRET)
}

pub fn setup() -> TestContext {
    setup_with(config())
}

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,identity_core=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn setup_with(config: IdentityConfig) -> TestContext {
    init_tracing();
    let clock = Arc::new(ManualClock::new(start_time()));
    let InMemoryIdentity {
        core,
        store,
        cache,
    } = IdentityCore::in_memory(&config, clock.clone()).unwrap();

    TestContext {
        identity: core,
        store,
        cache,
        clock,
    }
}

/// Argon2 is slow in debug builds; hash the shared password once.
fn password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&Password::new(PASSWORD))
            .unwrap()
            .into_string()
    })
    .clone()
}

impl TestContext {
    pub async fn role(&self, name: &str, keys: &[&str]) -> Role {
        let permissions: PermissionSet = keys.iter().map(|k| Permission::new(*k)).collect();
        self.store
            .create_role(Role::new(name.to_string(), permissions, start_time()))
            .await
            .unwrap()
    }

    /// Seed an active principal holding `roles`, password [`PASSWORD`].
    pub fn seed(&self, username: &str, roles: &[RoleId], is_superuser: bool) -> Principal {
        let principal = Principal {
            id: PrincipalId::new(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: password_hash(),
            is_active: true,
            is_superuser,
            roles: roles.iter().copied().collect::<BTreeSet<_>>(),
            direct_permissions: PermissionSet::new(),
            created_at: self.clock_now(),
            last_login: None,
        };
        self.store.seed_principal(principal.clone()).unwrap();
        principal
    }

    /// Seed a principal whose only grants come from a private role with `keys`.
    pub async fn user_with(&self, username: &str, keys: &[&str]) -> Principal {
        let role = self.role(&format!("{}-grants", username), keys).await;
        self.seed(username, &[role.id], false)
    }

    pub fn superuser(&self, username: &str) -> Principal {
        self.seed(username, &[], true)
    }

    /// Fresh snapshot of a principal from the store.
    pub async fn reload(&self, id: PrincipalId) -> Principal {
        self.store.find_principal(id).await.unwrap().unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use identity_core::services::Clock;
        self.clock.now()
    }
}
