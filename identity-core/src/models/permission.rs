//! Permission keys and per-operation requirements.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Opaque permission key of the form `resource.action` (e.g. `accounts.view`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parse untrusted input, rejecting anything that is not `resource.action`.
    pub fn parse(key: &str) -> Option<Self> {
        let (resource, action) = key.split_once('.')?;
        let valid_part = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        };
        if valid_part(resource) && valid_part(action) {
            Some(Self(key.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub type PermissionSet = BTreeSet<Permission>;

/// Permission keys checked by this crate.
pub mod codes {
    pub const ACCOUNTS_VIEW: &str = "accounts.view";
    pub const ACCOUNTS_CREATE: &str = "accounts.create";
    pub const ACCOUNTS_UPDATE: &str = "accounts.update";
    pub const ACCOUNTS_DELETE: &str = "accounts.delete";
    pub const ROLES_MANAGE: &str = "roles.manage";

    pub const ALL: [&str; 5] = [
        ACCOUNTS_VIEW,
        ACCOUNTS_CREATE,
        ACCOUNTS_UPDATE,
        ACCOUNTS_DELETE,
        ROLES_MANAGE,
    ];
}

/// What a caller must hold to run an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any authenticated principal may proceed.
    AuthenticatedOnly,
    /// Every listed permission must be held (superusers bypass).
    Permissions(PermissionSet),
}

impl Requirement {
    pub fn permissions<I, P>(keys: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        Self::Permissions(keys.into_iter().map(Into::into).collect())
    }

    /// Subset test; an empty permission set behaves like `AuthenticatedOnly`.
    pub fn is_satisfied_by(&self, granted: &PermissionSet) -> bool {
        match self {
            Requirement::AuthenticatedOnly => true,
            Requirement::Permissions(required) => required.is_subset(granted),
        }
    }

    pub fn missing(&self, granted: &PermissionSet) -> Vec<Permission> {
        match self {
            Requirement::AuthenticatedOnly => Vec::new(),
            Requirement::Permissions(required) => {
                required.difference(granted).cloned().collect()
            }
        }
    }
}

/// Every operation exposed by the services, with its requirement.
///
/// Operations that only need an authenticated caller are listed as
/// `AuthenticatedOnly` here rather than falling through to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentAccount,
    ChangeOwnPassword,
    ListRoles,
    ViewAccount,
    ListAccounts,
    CreateAccount,
    UpdateAccount,
    DeleteAccount,
    ResetPassword,
    AssignRole,
    RemoveRole,
    GrantPermission,
    RevokePermission,
    RestoreProfile,
    ViewEffectiveAccess,
    ManageRoles,
}

impl Operation {
    pub fn requirement(self) -> Requirement {
        use codes::*;

        match self {
            Operation::CurrentAccount | Operation::ChangeOwnPassword | Operation::ListRoles => {
                Requirement::AuthenticatedOnly
            }
            Operation::ViewAccount | Operation::ListAccounts | Operation::ViewEffectiveAccess => {
                Requirement::permissions([ACCOUNTS_VIEW])
            }
            Operation::CreateAccount => Requirement::permissions([ACCOUNTS_CREATE]),
            Operation::UpdateAccount
            | Operation::ResetPassword
            | Operation::AssignRole
            | Operation::RemoveRole
            | Operation::GrantPermission
            | Operation::RevokePermission
            | Operation::RestoreProfile => Requirement::permissions([ACCOUNTS_UPDATE]),
            Operation::DeleteAccount => Requirement::permissions([ACCOUNTS_DELETE]),
            Operation::ManageRoles => Requirement::permissions([ROLES_MANAGE]),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::CurrentAccount => "current_account",
            Operation::ChangeOwnPassword => "change_own_password",
            Operation::ListRoles => "list_roles",
            Operation::ViewAccount => "view_account",
            Operation::ListAccounts => "list_accounts",
            Operation::CreateAccount => "create_account",
            Operation::UpdateAccount => "update_account",
            Operation::DeleteAccount => "delete_account",
            Operation::ResetPassword => "reset_password",
            Operation::AssignRole => "assign_role",
            Operation::RemoveRole => "remove_role",
            Operation::GrantPermission => "grant_permission",
            Operation::RevokePermission => "revoke_permission",
            Operation::RestoreProfile => "restore_profile",
            Operation::ViewEffectiveAccess => "view_effective_access",
            Operation::ManageRoles => "manage_roles",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> PermissionSet {
        keys.iter().map(|k| Permission::new(*k)).collect()
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(Permission::parse("accounts.view").is_some());
        assert!(Permission::parse("accounts").is_none());
        assert!(Permission::parse(".view").is_none());
        assert!(Permission::parse("accounts.").is_none());
        assert!(Permission::parse("Accounts.View").is_none());
        assert!(Permission::parse("accounts.view all").is_none());
    }

    #[test]
    fn test_subset_semantics() {
        let granted = set(&["accounts.view", "accounts.update"]);

        assert!(Requirement::permissions(["accounts.view"]).is_satisfied_by(&granted));
        assert!(
            !Requirement::permissions(["accounts.view", "accounts.delete"])
                .is_satisfied_by(&granted)
        );
        assert!(Requirement::Permissions(PermissionSet::new()).is_satisfied_by(&PermissionSet::new()));
        assert!(Requirement::AuthenticatedOnly.is_satisfied_by(&PermissionSet::new()));
    }

    #[test]
    fn test_missing_lists_difference() {
        let granted = set(&["accounts.view"]);
        let missing =
            Requirement::permissions(["accounts.view", "accounts.delete"]).missing(&granted);
        assert_eq!(missing, vec![Permission::new("accounts.delete")]);
    }

    #[test]
    fn test_self_service_operations_are_authenticated_only() {
        assert_eq!(
            Operation::CurrentAccount.requirement(),
            Requirement::AuthenticatedOnly
        );
        assert_eq!(
            Operation::ChangeOwnPassword.requirement(),
            Requirement::AuthenticatedOnly
        );
        assert_eq!(
            Operation::DeleteAccount.requirement(),
            Requirement::permissions([codes::ACCOUNTS_DELETE])
        );
    }
}
