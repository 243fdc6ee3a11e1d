pub mod accounts;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod credentials;
pub mod database;
pub mod error;
pub mod gate;
pub mod jwt;
pub mod memory_store;
pub mod permissions;
pub mod redis;
pub mod roles;
pub mod store;

pub use accounts::AccountService;
pub use auth::{AuthService, LoginRequest, LoginResponse, SessionUser};
pub use cache::{KeyValueCache, MemoryCache, RevocationStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::CredentialVerifier;
pub use database::PgIdentityStore;
pub use error::AuthError;
pub use gate::AuthorizationGate;
pub use jwt::{
    Claims, RefreshedTokens, TokenIntrospection, TokenKind, TokenPair, TokenService,
    VerifiedAccess,
};
pub use memory_store::InMemoryIdentityStore;
pub use permissions::{EffectiveAccess, PermissionResolver};
pub use self::redis::RedisService;
pub use roles::RoleService;
pub use store::{IdentityStore, PrincipalGrants, StoreError};
