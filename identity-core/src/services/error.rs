use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown username and wrong password are deliberately indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    InactiveAccount,

    #[error("Current password is incorrect")]
    WrongOldPassword,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Token revocation store is not configured")]
    RevocationNotConfigured,

    #[error("Permission denied for {operation}")]
    PermissionDenied { operation: String },

    #[error("You cannot deactivate your own account")]
    SelfDeactivation,

    #[error("You cannot delete your own account")]
    SelfDeletion,

    #[error("You cannot remove your own administrator role")]
    SelfDemotion,

    #[error("Active account limit reached ({limit})")]
    QuotaExceeded { limit: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Identity store error: {0}")]
    Store(anyhow::Error),

    #[error("Cache error: {0}")]
    Cache(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AuthError::NotFound(what),
            StoreError::Conflict(what) => AuthError::Conflict(what),
            StoreError::QuotaExceeded { limit } => AuthError::QuotaExceeded { limit },
            StoreError::Unavailable(e) => AuthError::Store(e),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidCredentials | AuthError::InactiveAccount => {
                AppError::AuthError(anyhow::anyhow!(message))
            }
            AuthError::InvalidToken | AuthError::Revoked => {
                AppError::Unauthorized(anyhow::anyhow!(message))
            }
            AuthError::WrongOldPassword | AuthError::Validation(_) => {
                AppError::Unprocessable(anyhow::anyhow!(message))
            }
            AuthError::PermissionDenied { .. }
            | AuthError::SelfDeactivation
            | AuthError::SelfDeletion
            | AuthError::SelfDemotion
            | AuthError::QuotaExceeded { .. } => AppError::Forbidden(anyhow::anyhow!(message)),
            AuthError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            AuthError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(message)),
            AuthError::RevocationNotConfigured => AppError::ConfigError(anyhow::anyhow!(message)),
            AuthError::Store(e) => AppError::DatabaseError(e),
            AuthError::Cache(e) => AppError::ServiceUnavailable(e),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
