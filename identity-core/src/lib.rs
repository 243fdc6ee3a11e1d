//! identity-core: credential verification, JWT session lifecycle, cached
//! role-based permissions and account lifecycle rules.
//!
//! [`IdentityCore`] wires the services to their storage. Transports call the
//! services directly and map [`services::AuthError`] through
//! `service_core::error::AppError`.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::services::{
    AccountService, AuthService, AuthorizationGate, Clock, CredentialVerifier,
    InMemoryIdentityStore, IdentityStore, KeyValueCache, MemoryCache, PermissionResolver,
    PgIdentityStore, RedisService, RevocationStore, RoleService, SystemClock, TokenService,
};

/// Service graph shared by every request.
#[derive(Clone)]
pub struct IdentityCore {
    pub auth: Arc<AuthService>,
    pub accounts: Arc<AccountService>,
    pub roles: Arc<RoleService>,
    pub resolver: Arc<PermissionResolver>,
    pub gate: Arc<AuthorizationGate>,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialVerifier>,
    store: Arc<dyn IdentityStore>,
    cache: Arc<dyn KeyValueCache>,
    service_name: String,
}

/// In-memory wiring plus direct handles to its backing stores.
pub struct InMemoryIdentity {
    pub core: IdentityCore,
    pub store: Arc<InMemoryIdentityStore>,
    pub cache: Arc<MemoryCache>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: String,
    pub database: &'static str,
    pub cache: &'static str,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

fn up_or_down(ok: bool) -> &'static str {
    if ok { "up" } else { "down" }
}

impl IdentityCore {
    /// Process bootstrap: installs tracing, connects to PostgreSQL and Redis
    /// and applies migrations.
    pub async fn connect(config: IdentityConfig) -> Result<Self, AppError> {
        service_core::observability::init_tracing(
            &config.service_name,
            &config.log_level,
            config.common.log_format,
        );
        config.validate()?;

        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;

        let redis = Arc::new(RedisService::new(&config.redis).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to Redis");
            AppError::ServiceUnavailable(e)
        })?);

        let store: Arc<dyn IdentityStore> = Arc::new(PgIdentityStore::new(pool));
        let cache: Arc<dyn KeyValueCache> = redis.clone();
        let revocation: Arc<dyn RevocationStore> = redis;

        tracing::info!(
            service = %config.service_name,
            environment = ?config.environment,
            "Identity core ready"
        );

        Self::from_parts(
            &config,
            store,
            cache,
            Some(revocation),
            Arc::new(SystemClock),
        )
    }

    /// Wiring over in-process stores, for tests and local development.
    pub fn in_memory(
        config: &IdentityConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<InMemoryIdentity, AppError> {
        let store = Arc::new(InMemoryIdentityStore::new());
        let cache = Arc::new(MemoryCache::new(clock.clone()));

        let identity_store: Arc<dyn IdentityStore> = store.clone();
        let kv: Arc<dyn KeyValueCache> = cache.clone();
        let revocation: Arc<dyn RevocationStore> = cache.clone();

        Ok(InMemoryIdentity {
            core: Self::from_parts(config, identity_store, kv, Some(revocation), clock)?,
            store,
            cache,
        })
    }

    pub fn from_parts(
        config: &IdentityConfig,
        store: Arc<dyn IdentityStore>,
        cache: Arc<dyn KeyValueCache>,
        revocation: Option<Arc<dyn RevocationStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            cache.clone(),
            config.cache.permission_ttl_seconds,
        ));
        let gate = Arc::new(AuthorizationGate::new(resolver.clone()));
        let tokens = Arc::new(TokenService::new(&config.jwt, revocation, clock.clone())?);
        let credentials = Arc::new(CredentialVerifier::new(store.clone(), clock.clone()));

        let auth = Arc::new(AuthService::new(
            store.clone(),
            credentials.clone(),
            tokens.clone(),
            resolver.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            credentials.clone(),
            resolver.clone(),
            gate.clone(),
            config.accounts.clone(),
            clock.clone(),
        ));
        let roles = Arc::new(RoleService::new(
            store.clone(),
            resolver.clone(),
            gate.clone(),
            config.accounts.admin_role_name.clone(),
            clock,
        ));

        Ok(Self {
            auth,
            accounts,
            roles,
            resolver,
            gate,
            tokens,
            credentials,
            store,
            cache,
            service_name: config.service_name.clone(),
        })
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Probe the identity store and the cache. Never fails; failures show up
    /// as `down` in the report.
    pub async fn health(&self) -> HealthReport {
        let database = match self.store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Identity store health check failed");
                false
            }
        };

        let cache = match self.cache_round_trip().await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(error = %e, "Cache health check failed");
                false
            }
        };

        HealthReport {
            status: if database && cache { "healthy" } else { "unhealthy" },
            service: self.service_name.clone(),
            database: up_or_down(database),
            cache: up_or_down(cache),
        }
    }

    async fn cache_round_trip(&self) -> Result<bool, anyhow::Error> {
        let key = format!("health_check:{}", Uuid::new_v4().simple());
        self.cache.set(&key, "ok", 10).await?;
        let value = self.cache.get(&key).await?;
        self.cache.delete(&key).await?;
        Ok(value.as_deref() == Some("ok"))
    }
}
