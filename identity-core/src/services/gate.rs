use std::sync::Arc;

use super::error::AuthError;
use super::permissions::PermissionResolver;
use crate::models::{Operation, Permission, Principal, Requirement};

/// Allow/deny decisions for authenticated principals.
///
/// Every decision that needs stored data fails closed: if permissions cannot
/// be resolved the answer is "deny".
pub struct AuthorizationGate {
    resolver: Arc<PermissionResolver>,
}

impl AuthorizationGate {
    pub fn new(resolver: Arc<PermissionResolver>) -> Self {
        Self { resolver }
    }

    pub async fn authorize(&self, principal: &Principal, requirement: &Requirement) -> bool {
        match self.evaluate(principal, requirement).await {
            Ok(missing) => missing.is_empty(),
            Err(e) => {
                tracing::warn!(user_id = %principal.id, error = %e, "Authorization check failed, denying");
                false
            }
        }
    }

    pub async fn is_allowed(&self, principal: &Principal, operation: Operation) -> bool {
        self.authorize(principal, &operation.requirement()).await
    }

    /// Like [`authorize`](Self::authorize), but reports why. Resolver failures
    /// are propagated as-is and still mean "not allowed".
    pub async fn require(&self, principal: &Principal, operation: Operation) -> Result<(), AuthError> {
        let missing = self.evaluate(principal, &operation.requirement()).await?;
        if missing.is_empty() {
            return Ok(());
        }

        let missing: Vec<&str> = missing.iter().map(Permission::as_str).collect();
        tracing::warn!(
            user_id = %principal.id,
            operation = %operation,
            ?missing,
            "Permission denied"
        );
        Err(AuthError::PermissionDenied {
            operation: operation.name().to_string(),
        })
    }

    /// Permissions the principal lacks; empty means allowed.
    async fn evaluate(
        &self,
        principal: &Principal,
        requirement: &Requirement,
    ) -> Result<Vec<Permission>, AuthError> {
        if principal.is_superuser {
            return Ok(Vec::new());
        }

        match requirement {
            Requirement::AuthenticatedOnly => Ok(Vec::new()),
            Requirement::Permissions(required) if required.is_empty() => Ok(Vec::new()),
            Requirement::Permissions(_) => {
                let granted = self.resolver.resolve(principal.id).await?;
                Ok(requirement.missing(&granted))
            }
        }
    }
}
