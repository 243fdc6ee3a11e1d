//! User accounts: principal record, profile, and the request shapes that mutate them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{PermissionSet, RoleId};

/// Identity of a principal (user account).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for PrincipalId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<PrincipalId> for Uuid {
    fn from(value: PrincipalId) -> Self {
        value.0
    }
}

impl std::str::FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Principal entity. Never serialized directly; see [`AccountResponse`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub roles: BTreeSet<RoleId>,
    pub direct_permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    pub fn holds_role(&self, role_id: RoleId) -> bool {
        self.roles.contains(&role_id)
    }
}

/// One-to-one extension of a principal holding non-auth metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub principal_id: PrincipalId,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub department: Option<String>,
    pub employee_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(principal_id: PrincipalId, fields: &ProfileFields, now: DateTime<Utc>) -> Self {
        let mut profile = Self {
            principal_id,
            phone: None,
            avatar_url: None,
            department: None,
            employee_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        profile.apply(fields, now);
        profile
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Overwrite the fields present in `fields`; blank strings clear a field.
    pub fn apply(&mut self, fields: &ProfileFields, now: DateTime<Utc>) {
        fn merge(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                let v = v.trim();
                *slot = if v.is_empty() { None } else { Some(v.to_string()) };
            }
        }

        merge(&mut self.phone, &fields.phone);
        merge(&mut self.avatar_url, &fields.avatar_url);
        merge(&mut self.department, &fields.department);
        merge(&mut self.employee_id, &fields.employee_id);
        merge(&mut self.notes, &fields.notes);
        self.updated_at = now;
    }
}

/// A principal together with its profile.
#[derive(Debug, Clone)]
pub struct Account {
    pub principal: Principal,
    pub profile: Profile,
}

/// Optional profile fields. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileFields {
    #[validate(length(max = 20, message = "Phone must be at most 20 characters"))]
    pub phone: Option<String>,

    #[validate(url(message = "Invalid avatar URL"))]
    pub avatar_url: Option<String>,

    #[validate(length(max = 100, message = "Department must be at most 100 characters"))]
    pub department: Option<String>,

    #[validate(length(max = 50, message = "Employee id must be at most 50 characters"))]
    pub employee_id: Option<String>,

    pub notes: Option<String>,
}

/// Input for account creation.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAccount {
    #[validate(length(min = 1, max = 150, message = "Username must be 1-150 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,

    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default)]
    #[validate(nested)]
    pub profile: ProfileFields,

    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

fn default_active() -> bool {
    true
}

impl NewAccount {
    /// Trims identity fields, lowercases the email and drops repeated role ids.
    /// Runs before validation so whitespace-only usernames are rejected.
    pub fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_lowercase();

        let mut seen = BTreeSet::new();
        self.role_ids.retain(|id| seen.insert(*id));
        self
    }
}

/// Partial update of an account. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AccountChanges {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 150))]
    pub first_name: Option<String>,

    #[validate(length(max = 150))]
    pub last_name: Option<String>,

    pub is_active: Option<bool>,

    #[serde(default)]
    #[validate(nested)]
    pub profile: ProfileFields,

    /// Replaces the full role set when present.
    pub role_ids: Option<Vec<RoleId>>,
}

impl AccountChanges {
    pub fn deactivates(&self) -> bool {
        self.is_active == Some(false)
    }
}

/// Storage-level record for a principal about to be created.
#[derive(Debug, Clone)]
pub struct NewPrincipalRecord {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub role_ids: Vec<RoleId>,
    pub profile: ProfileFields,
    pub created_at: DateTime<Utc>,
}

/// Listing filter; all conditions must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountFilter {
    pub username_contains: Option<String>,
    pub email_contains: Option<String>,
    pub is_active: Option<bool>,
}

impl AccountFilter {
    pub fn matches(&self, principal: &Principal) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
                .unwrap_or(true)
        }

        contains(&principal.username, &self.username_contains)
            && contains(&principal.email, &self.email_contains)
            && self
                .is_active
                .map(|active| principal.is_active == active)
                .unwrap_or(true)
    }
}

/// Account response (without sensitive fields).
#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub profile: Profile,
}

impl AccountResponse {
    pub fn new(account: &Account, role_names: Vec<String>) -> Self {
        let principal = &account.principal;
        Self {
            id: principal.id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            full_name: principal.full_name(),
            is_active: principal.is_active,
            is_superuser: principal.is_superuser,
            roles: role_names,
            created_at: principal.created_at,
            last_login: principal.last_login,
            profile: account.profile.clone(),
        }
    }
}

/// Login activity summary for one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStats {
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub days_since_creation: i64,
}

impl AccountStats {
    pub fn at(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            last_login: principal.last_login,
            created_at: principal.created_at,
            is_active: principal.is_active,
            days_since_creation: (now - principal.created_at).num_days(),
        }
    }
}
