use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::credentials::CredentialVerifier;
use super::error::AuthError;
use super::jwt::{RefreshedTokens, TokenIntrospection, TokenPair, TokenService, VerifiedAccess};
use super::permissions::PermissionResolver;
use super::store::IdentityStore;
use crate::models::{PermissionSet, Principal, PrincipalId};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Who just logged in, with what they may do.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub is_superuser: bool,
    pub roles: Vec<String>,
    pub permissions: PermissionSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SessionUser,
}

/// Login, refresh, logout and access-token resolution.
pub struct AuthService {
    store: Arc<dyn IdentityStore>,
    credentials: Arc<CredentialVerifier>,
    tokens: Arc<TokenService>,
    resolver: Arc<PermissionResolver>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        credentials: Arc<CredentialVerifier>,
        tokens: Arc<TokenService>,
        resolver: Arc<PermissionResolver>,
    ) -> Self {
        Self {
            store,
            credentials,
            tokens,
            resolver,
        }
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        req.validate()?;
        tracing::info!(username = %req.username, "Login attempt");

        let principal = self
            .credentials
            .authenticate(&req.username, &req.password)
            .await?;
        let tokens = self.tokens.issue(principal.id)?;
        let access = self.resolver.effective_access(&principal).await?;

        tracing::info!(user_id = %principal.id, "User logged in");

        Ok(LoginResponse {
            tokens,
            user: SessionUser {
                id: principal.id,
                full_name: principal.full_name(),
                username: principal.username,
                email: principal.email,
                is_superuser: principal.is_superuser,
                roles: access.roles,
                permissions: access.permissions,
            },
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        self.tokens.refresh(refresh_token).await
    }

    /// Revoke the refresh token. The access token stays usable until it expires.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let principal_id = self.tokens.revoke(refresh_token).await?;
        tracing::info!(user_id = %principal_id, "User logged out");
        Ok(())
    }

    pub fn verify(&self, access_token: &str) -> Result<VerifiedAccess, AuthError> {
        self.tokens.verify(access_token)
    }

    pub fn introspect(&self, access_token: &str) -> TokenIntrospection {
        self.tokens.introspect(access_token)
    }

    /// Resolve a bearer access token to its principal, which must still exist and be active.
    pub async fn current_principal(&self, access_token: &str) -> Result<Principal, AuthError> {
        let verified = self.tokens.verify(access_token)?;
        let principal = self
            .store
            .find_principal(verified.principal_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if !principal.is_active {
            return Err(AuthError::InactiveAccount);
        }

        Ok(principal)
    }
}
