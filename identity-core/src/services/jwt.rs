use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::cache::RevocationStore;
use super::clock::Clock;
use super::error::AuthError;
use crate::config::JwtConfig;
use crate::models::PrincipalId;

/// Which track a token belongs to. Checked on every decode so a refresh token
/// can never pass as an access token or the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (principal ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub token_type: TokenKind,
    /// Refresh tokens only: 128-bit random id, the Revocation Set key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Token response returned at login
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Result of a refresh. `refresh_token` is present only when rotation is on.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAccess {
    pub principal_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenIntrospection {
    pub valid: bool,
    pub principal_id: Option<PrincipalId>,
    pub exp: Option<i64>,
}

/// Issues and validates HS256 access/refresh tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    rotate_refresh_tokens: bool,
    revocation: Option<Arc<dyn RevocationStore>>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        config: &JwtConfig,
        revocation: Option<Arc<dyn RevocationStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let (access_token_ttl, refresh_token_ttl) = config.lifetimes()?;
        let secret = config.secret.expose_secret().as_bytes();
        let revocation = if config.revocation_enabled {
            revocation
        } else {
            None
        };

        if revocation.is_none() {
            tracing::warn!("Token revocation store not configured; refresh and logout are disabled");
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_ttl,
            refresh_token_ttl,
            rotate_refresh_tokens: config.rotate_refresh_tokens,
            revocation,
            clock,
        })
    }

    /// Access token lifetime in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }

    pub fn issue(&self, principal_id: PrincipalId) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let access_token = self.mint(principal_id, TokenKind::Access, now)?;
        let refresh_token = self.mint(principal_id, TokenKind::Refresh, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    /// Pure signature, expiry and kind check. Never touches storage.
    pub fn verify(&self, access_token: &str) -> Result<VerifiedAccess, AuthError> {
        let claims = self.decode(access_token, TokenKind::Access)?;
        let principal_id = claims
            .sub
            .parse::<PrincipalId>()
            .map_err(|_| AuthError::InvalidToken)?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(AuthError::InvalidToken)?;

        Ok(VerifiedAccess {
            principal_id,
            expires_at,
        })
    }

    pub fn introspect(&self, access_token: &str) -> TokenIntrospection {
        match self.verify(access_token) {
            Ok(verified) => TokenIntrospection {
                valid: true,
                principal_id: Some(verified.principal_id),
                exp: Some(verified.expires_at.timestamp()),
            },
            Err(_) => TokenIntrospection {
                valid: false,
                principal_id: None,
                exp: None,
            },
        }
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// With rotation on, the presented token is revoked with insert-if-absent,
    /// so of two concurrent refreshes of the same token only one can win.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        let store = self.revocation_store()?;
        let claims = self.decode(refresh_token, TokenKind::Refresh)?;
        let token_id = claims.jti.as_deref().ok_or(AuthError::InvalidToken)?;
        let principal_id = claims
            .sub
            .parse::<PrincipalId>()
            .map_err(|_| AuthError::InvalidToken)?;

        if store.is_revoked(token_id).await.map_err(AuthError::Cache)? {
            tracing::warn!(user_id = %principal_id, "Refresh refused: token revoked");
            return Err(AuthError::Revoked);
        }

        let now = self.clock.now();
        let new_refresh_token = if self.rotate_refresh_tokens {
            let inserted = store
                .revoke(token_id, remaining_seconds(claims.exp, now))
                .await
                .map_err(AuthError::Cache)?;
            if !inserted {
                tracing::warn!(user_id = %principal_id, "Refresh refused: token already rotated");
                return Err(AuthError::Revoked);
            }
            Some(self.mint(principal_id, TokenKind::Refresh, now)?)
        } else {
            None
        };

        let access_token = self.mint(principal_id, TokenKind::Access, now)?;
        tracing::info!(
            user_id = %principal_id,
            rotated = new_refresh_token.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshedTokens {
            access_token,
            refresh_token: new_refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    /// Add the refresh token's id to the Revocation Set. Idempotent.
    ///
    /// Returns the token's subject. The paired access token stays valid until
    /// it expires.
    pub async fn revoke(&self, refresh_token: &str) -> Result<PrincipalId, AuthError> {
        let store = self.revocation_store()?;
        let claims = self.decode(refresh_token, TokenKind::Refresh)?;
        let token_id = claims.jti.as_deref().ok_or(AuthError::InvalidToken)?;
        let principal_id = claims
            .sub
            .parse::<PrincipalId>()
            .map_err(|_| AuthError::InvalidToken)?;

        let newly_revoked = store
            .revoke(token_id, remaining_seconds(claims.exp, self.clock.now()))
            .await
            .map_err(AuthError::Cache)?;

        if !newly_revoked {
            tracing::debug!(user_id = %principal_id, "Refresh token was already revoked");
        }

        Ok(principal_id)
    }

    fn revocation_store(&self) -> Result<&Arc<dyn RevocationStore>, AuthError> {
        self.revocation
            .as_ref()
            .ok_or(AuthError::RevocationNotConfigured)
    }

    fn mint(
        &self,
        principal_id: PrincipalId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let (ttl, jti) = match kind {
            TokenKind::Access => (self.access_token_ttl, None),
            TokenKind::Refresh => (self.refresh_token_ttl, Some(generate_token_id())),
        };

        let iat = now.timestamp();
        let claims = Claims {
            sub: principal_id.to_string(),
            exp: iat + ttl.num_seconds(),
            iat,
            token_type: kind,
            jti,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Signature check by the library, expiry by our clock: `now >= exp` is
    /// expired, no leeway.
    fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.token_type != expected {
            return Err(AuthError::InvalidToken);
        }

        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}

fn remaining_seconds(exp: i64, now: DateTime<Utc>) -> u64 {
    (exp - now.timestamp()).max(1) as u64
}

/// 128 random bits, hex encoded.
fn generate_token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
