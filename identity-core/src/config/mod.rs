use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

const MIN_JWT_SECRET_BYTES: usize = 32;
const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub accounts: AccountPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 signing secret, shared by signer and verifier.
    pub secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub rotate_refresh_tokens: bool,
    /// When false, refresh and logout fail with `RevocationNotConfigured`.
    pub revocation_enabled: bool,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            rotate_refresh_tokens: true,
            revocation_enabled: true,
        }
    }

    /// Access and refresh lifetimes as durations. Out-of-range values are a
    /// configuration error.
    pub fn lifetimes(&self) -> Result<(Duration, Duration), AppError> {
        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_MINUTES).contains(&self.access_token_expiry_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.refresh_token_expiry_days) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }

        let access = Duration::try_minutes(self.access_token_expiry_minutes);
        let refresh = Duration::try_days(self.refresh_token_expiry_days);
        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok((access, refresh)),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT token lifetimes are out of range"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub permission_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            permission_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountPolicy {
    /// Ceiling on simultaneously active principals; `None` disables the check.
    pub max_active_accounts: Option<u64>,
    /// Holders of this role cannot remove it from themselves.
    pub admin_role_name: String,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            max_active_accounts: Some(10),
            admin_role_name: "Administrators".to_string(),
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let max_active: u64 = parse_env("MAX_ACTIVE_ACCOUNTS", Some("10"), is_prod)?;

        let config = IdentityConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-core"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
                rotate_refresh_tokens: parse_env("JWT_ROTATE_REFRESH_TOKENS", Some("true"), is_prod)?,
                revocation_enabled: parse_env("TOKEN_REVOCATION_ENABLED", Some("true"), is_prod)?,
            },
            cache: CacheConfig {
                permission_ttl_seconds: parse_env(
                    "PERMISSION_CACHE_TTL_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
            },
            accounts: AccountPolicy {
                max_active_accounts: (max_active > 0).then_some(max_active),
                admin_role_name: get_env("ADMIN_ROLE_NAME", Some("Administrators"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Development defaults with the given signing secret. Storage URLs point at localhost.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-core".to_string(),
            log_level: "info".to_string(),
            database: DatabaseConfig {
                url: "postgres://localhost/identity".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            jwt: JwtConfig::new(secret),
            cache: CacheConfig::default(),
            accounts: AccountPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let (access_ttl, refresh_ttl) = self.jwt.lifetimes()?;
        if refresh_ttl <= access_ttl {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Refresh token lifetime must be longer than access token lifetime"
            )));
        }

        if self.jwt.secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_BYTES
            )));
        }

        if self.cache.permission_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PERMISSION_CACHE_TTL_SECONDS must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod && !self.jwt.revocation_enabled {
            tracing::error!(
                "Token revocation is disabled in production - refresh and logout will be refused"
            );
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
