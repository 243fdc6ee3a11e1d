use std::sync::Arc;

use super::clock::Clock;
use super::error::AuthError;
use super::store::IdentityStore;
use crate::models::{Principal, PrincipalId};
use crate::utils::{Password, PasswordHashString, hash_password, verify_dummy, verify_password};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Password checks and the only path that writes password hashes.
pub struct CredentialVerifier {
    store: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Unknown usernames and wrong passwords fail identically, after one
    /// Argon2 verification each. The inactive check only runs once the
    /// password has verified.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        let password = Password::new(password);

        let Some(mut principal) = self.store.find_principal_by_username(username).await? else {
            verify_dummy(&password);
            tracing::warn!(username = %username, "Login failed: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        };

        if verify_password(
            &password,
            &PasswordHashString::new(principal.password_hash.clone()),
        )
        .is_err()
        {
            tracing::warn!(username = %username, "Login failed: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        }

        if !principal.is_active {
            tracing::warn!(user_id = %principal.id, "Login refused: account inactive");
            return Err(AuthError::InactiveAccount);
        }

        let now = self.clock.now();
        self.store.record_login(principal.id, now).await?;
        principal.last_login = Some(now);

        tracing::info!(user_id = %principal.id, "User authenticated");
        Ok(principal)
    }

    pub async fn change_password(
        &self,
        principal: &Principal,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let current = self
            .store
            .find_principal(principal.id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;

        verify_password(
            &Password::new(old_password),
            &PasswordHashString::new(current.password_hash),
        )
        .map_err(|_| AuthError::WrongOldPassword)?;

        self.set_password(current.id, &current.username, new_password)
            .await?;

        tracing::info!(user_id = %principal.id, "Password changed");
        Ok(())
    }

    /// Store a fresh hash without checking the old password. Callers decide who may do this.
    pub async fn set_password(
        &self,
        principal_id: PrincipalId,
        username: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let hash = self.hash_new_password(username, new_password)?;
        self.store
            .set_password_hash(principal_id, hash.as_str())
            .await?;
        Ok(())
    }

    /// Apply the password policy and hash.
    pub fn hash_new_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> Result<PasswordHashString, AuthError> {
        validate_new_password(new_password, username)?;
        hash_password(&Password::new(new_password)).map_err(AuthError::Internal)
    }
}

pub fn validate_new_password(password: &str, username: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    if password.eq_ignore_ascii_case(username) {
        return Err(AuthError::Validation(
            "Password must not match the username".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_policy() {
        assert!(validate_new_password("s3cure-enough", "alice").is_ok());
        assert!(matches!(
            validate_new_password("short", "alice"),
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            validate_new_password("AliceSmith", "alicesmith"),
            Err(AuthError::Validation(_))
        ));
    }
}
