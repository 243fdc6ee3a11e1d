//! PostgreSQL identity store.
//!
//! Queries are runtime-checked (`query`/`query_as`) so the crate builds
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::store::{IdentityStore, PrincipalGrants, StoreError};
use crate::models::{
    Account, AccountChanges, AccountFilter, NewPrincipalRecord, Permission, PermissionSet,
    Principal, PrincipalId, Profile, Role, RoleId,
};

/// Serializes the active-account count with the insert that depends on it.
const ACCOUNT_QUOTA_LOCK_KEY: i64 = 0x1d_e7_17_00_c0_07_a0;

const ACCOUNT_SELECT: &str = r#"
    SELECT p.principal_id, p.username, p.email, p.first_name, p.last_name, p.password_hash,
           p.active_flag, p.superuser_flag, p.created_utc, p.last_login_utc,
           ARRAY(SELECT pr.role_id FROM principal_roles pr
                 WHERE pr.principal_id = p.principal_id) AS role_ids,
           ARRAY(SELECT pp.permission_key FROM principal_permissions pp
                 WHERE pp.principal_id = p.principal_id) AS permission_keys,
           f.phone, f.avatar_url, f.department, f.employee_id, f.notes,
           f.created_utc AS profile_created_utc,
           f.updated_utc AS profile_updated_utc,
           f.deleted_utc AS profile_deleted_utc
    FROM principals p
    JOIN profiles f ON f.principal_id = p.principal_id
"#;

const ROLE_SELECT: &str = r#"
    SELECT r.role_id, r.role_name, r.created_utc,
           ARRAY(SELECT rp.permission_key FROM role_permissions rp
                 WHERE rp.role_id = r.role_id) AS permission_keys
    FROM roles r
"#;

#[derive(sqlx::FromRow)]
struct AccountRow {
    principal_id: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    active_flag: bool,
    superuser_flag: bool,
    created_utc: DateTime<Utc>,
    last_login_utc: Option<DateTime<Utc>>,
    role_ids: Vec<Uuid>,
    permission_keys: Vec<String>,
    phone: Option<String>,
    avatar_url: Option<String>,
    department: Option<String>,
    employee_id: Option<String>,
    notes: Option<String>,
    profile_created_utc: DateTime<Utc>,
    profile_updated_utc: DateTime<Utc>,
    profile_deleted_utc: Option<DateTime<Utc>>,
}

impl AccountRow {
    fn into_account(self) -> Account {
        let id = PrincipalId::from(self.principal_id);
        Account {
            principal: Principal {
                id,
                username: self.username,
                email: self.email,
                first_name: self.first_name,
                last_name: self.last_name,
                password_hash: self.password_hash,
                is_active: self.active_flag,
                is_superuser: self.superuser_flag,
                roles: self.role_ids.into_iter().map(RoleId::from).collect(),
                direct_permissions: self.permission_keys.into_iter().map(Permission::new).collect(),
                created_at: self.created_utc,
                last_login: self.last_login_utc,
            },
            profile: Profile {
                principal_id: id,
                phone: self.phone,
                avatar_url: self.avatar_url,
                department: self.department,
                employee_id: self.employee_id,
                notes: self.notes,
                created_at: self.profile_created_utc,
                updated_at: self.profile_updated_utc,
                deleted_at: self.profile_deleted_utc,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    principal_id: Uuid,
    phone: Option<String>,
    avatar_url: Option<String>,
    department: Option<String>,
    employee_id: Option<String>,
    notes: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    deleted_utc: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            principal_id: PrincipalId::from(row.principal_id),
            phone: row.phone,
            avatar_url: row.avatar_url,
            department: row.department,
            employee_id: row.employee_id,
            notes: row.notes,
            created_at: row.created_utc,
            updated_at: row.updated_utc,
            deleted_at: row.deleted_utc,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    role_id: Uuid,
    role_name: String,
    created_utc: DateTime<Utc>,
    permission_keys: Vec<String>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self {
            id: RoleId::from(row.role_id),
            name: row.role_name,
            permissions: row.permission_keys.into_iter().map(Permission::new).collect(),
            created_at: row.created_utc,
        }
    }
}

/// Map driver errors onto store semantics: unique violations are conflicts,
/// dangling references are lookups that missed, everything else is an outage.
fn db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            let subject = match db_err.constraint() {
                Some("principals_username_key") => "Username",
                Some("principals_email_key") => "Email",
                Some("profiles_employee_id_key") => "Employee id",
                Some("roles_role_name_key") => "Role",
                _ => "Record",
            };
            return StoreError::Conflict(subject.to_string());
        }
        if db_err.is_foreign_key_violation() {
            let subject = match db_err.constraint() {
                Some(name) if name.contains("role_id") => "Role",
                _ => "User",
            };
            return StoreError::NotFound(subject.to_string());
        }
    }
    tracing::error!(error = %e, "Identity store query failed");
    StoreError::Unavailable(anyhow::anyhow!(e))
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

fn permission_keys(permissions: &PermissionSet) -> Vec<String> {
    permissions.iter().map(|p| p.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM principals WHERE principal_id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound("User".to_string()))
        }
    }

    async fn ensure_role(&self, id: RoleId) -> Result<(), StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE role_id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound("Role".to_string()))
        }
    }

    async fn require_account(&self, id: PrincipalId) -> Result<Account, StoreError> {
        self.find_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("User".to_string()))
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::Unavailable(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        Ok(self.find_account(id).await?.map(|account| account.principal))
    }

    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let sql = format!("{} WHERE p.username = $1", ACCOUNT_SELECT);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(|row| row.into_account().principal))
    }

    async fn find_account(&self, id: PrincipalId) -> Result<Option<Account>, StoreError> {
        let sql = format!("{} WHERE p.principal_id = $1", ACCOUNT_SELECT);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(AccountRow::into_account))
    }

    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            r#"{}
            WHERE ($1::TEXT IS NULL OR p.username ILIKE $1)
              AND ($2::TEXT IS NULL OR p.email ILIKE $2)
              AND ($3::BOOLEAN IS NULL OR p.active_flag = $3)
            ORDER BY p.created_utc DESC
            "#,
            ACCOUNT_SELECT
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(filter.username_contains.as_deref().map(like_pattern))
            .bind(filter.email_contains.as_deref().map(like_pattern))
            .bind(filter.is_active)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(AccountRow::into_account).collect())
    }

    async fn active_principal_ids(&self) -> Result<Vec<PrincipalId>, StoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT principal_id FROM principals WHERE active_flag")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(ids.into_iter().map(PrincipalId::from).collect())
    }

    async fn create_account(
        &self,
        record: NewPrincipalRecord,
        max_active: Option<u64>,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if let Some(limit) = max_active {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(ACCOUNT_QUOTA_LOCK_KEY)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            let active: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM principals WHERE active_flag")
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error)?;

            if active.max(0) as u64 >= limit {
                tx.rollback().await.ok();
                return Err(StoreError::QuotaExceeded { limit });
            }
        }

        let id = PrincipalId::new();
        let profile = Profile::new(id, &record.profile, record.created_at);

        sqlx::query(
            r#"
            INSERT INTO principals (principal_id, username, email, first_name, last_name,
                                    password_hash, active_flag, superuser_flag, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&record.username)
        .bind(&record.email)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.password_hash)
        .bind(record.is_active)
        .bind(record.is_superuser)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO profiles (principal_id, phone, avatar_url, department, employee_id, notes,
                                  created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&profile.phone)
        .bind(&profile.avatar_url)
        .bind(&profile.department)
        .bind(&profile.employee_id)
        .bind(&profile.notes)
        .bind(profile.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if !record.role_ids.is_empty() {
            sqlx::query(
                "INSERT INTO principal_roles (principal_id, role_id) SELECT $1, UNNEST($2::UUID[]) ON CONFLICT DO NOTHING",
            )
            .bind(Uuid::from(id))
            .bind(uuids(&record.role_ids))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;

        Ok(Account {
            principal: Principal {
                id,
                username: record.username,
                email: record.email,
                first_name: record.first_name,
                last_name: record.last_name,
                password_hash: record.password_hash,
                is_active: record.is_active,
                is_superuser: record.is_superuser,
                roles: record.role_ids.into_iter().collect(),
                direct_permissions: PermissionSet::new(),
                created_at: record.created_at,
                last_login: None,
            },
            profile,
        })
    }

    async fn update_account(
        &self,
        id: PrincipalId,
        changes: &AccountChanges,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let current = sqlx::query_as::<_, ProfileRow>(
            "SELECT * FROM profiles WHERE principal_id = $1 FOR UPDATE",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::NotFound("User".to_string()))?;

        sqlx::query(
            r#"
            UPDATE principals
            SET email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                active_flag = COALESCE($5, active_flag)
            WHERE principal_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(changes.email.as_deref().map(|e| e.trim().to_lowercase()))
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(changes.is_active)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut profile = Profile::from(current);
        profile.apply(&changes.profile, now);

        sqlx::query(
            r#"
            UPDATE profiles
            SET phone = $2, avatar_url = $3, department = $4, employee_id = $5, notes = $6,
                updated_utc = $7
            WHERE principal_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&profile.phone)
        .bind(&profile.avatar_url)
        .bind(&profile.department)
        .bind(&profile.employee_id)
        .bind(&profile.notes)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if let Some(role_ids) = &changes.role_ids {
            sqlx::query("DELETE FROM principal_roles WHERE principal_id = $1")
                .bind(Uuid::from(id))
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            sqlx::query(
                r#"
                INSERT INTO principal_roles (principal_id, role_id)
                SELECT $1, UNNEST($2::UUID[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(Uuid::from(id))
            .bind(uuids(role_ids))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        self.require_account(id).await
    }

    async fn soft_delete_account(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query("UPDATE principals SET active_flag = FALSE WHERE principal_id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound("User".to_string()));
        }

        sqlx::query(
            "UPDATE profiles SET deleted_utc = $2, updated_utc = $2 WHERE principal_id = $1",
        )
        .bind(Uuid::from(id))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        self.require_account(id).await
    }

    async fn restore_profile(
        &self,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        sqlx::query_as::<_, ProfileRow>(
            r#"
            UPDATE profiles SET deleted_utc = NULL, updated_utc = $2
            WHERE principal_id = $1
            RETURNING *
            "#,
        )
        .bind(Uuid::from(id))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Profile::from)
        .ok_or_else(|| StoreError::NotFound("User".to_string()))
    }

    async fn set_password_hash(&self, id: PrincipalId, hash: &str) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE principals SET password_hash = $2 WHERE principal_id = $1")
            .bind(Uuid::from(id))
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("User".to_string()));
        }
        Ok(())
    }

    async fn record_login(&self, id: PrincipalId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated =
            sqlx::query("UPDATE principals SET last_login_utc = $2 WHERE principal_id = $1")
                .bind(Uuid::from(id))
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("User".to_string()));
        }
        Ok(())
    }

    async fn add_role_member(&self, id: PrincipalId, role_id: RoleId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO principal_roles (principal_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(role_id))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove_role_member(
        &self,
        id: PrincipalId,
        role_id: RoleId,
    ) -> Result<(), StoreError> {
        self.ensure_principal(id).await?;
        sqlx::query("DELETE FROM principal_roles WHERE principal_id = $1 AND role_id = $2")
            .bind(Uuid::from(id))
            .bind(Uuid::from(role_id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn grant_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO principal_permissions (principal_id, permission_key)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::from(id))
        .bind(permission.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn revoke_permission(
        &self,
        id: PrincipalId,
        permission: &Permission,
    ) -> Result<(), StoreError> {
        self.ensure_principal(id).await?;
        sqlx::query(
            "DELETE FROM principal_permissions WHERE principal_id = $1 AND permission_key = $2",
        )
        .bind(Uuid::from(id))
        .bind(permission.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn load_grants(&self, id: PrincipalId) -> Result<Option<PrincipalGrants>, StoreError> {
        let direct: Option<Vec<String>> = sqlx::query_scalar(
            r#"
            SELECT ARRAY(SELECT pp.permission_key FROM principal_permissions pp
                         WHERE pp.principal_id = p.principal_id)
            FROM principals p
            WHERE p.principal_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(direct) = direct else {
            return Ok(None);
        };

        let sql = format!(
            "{} WHERE r.role_id IN (SELECT role_id FROM principal_roles WHERE principal_id = $1)",
            ROLE_SELECT
        );
        let roles = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(Some(PrincipalGrants {
            direct: direct.into_iter().map(Permission::new).collect(),
            roles: roles.into_iter().map(Role::from).collect(),
        }))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let sql = format!("{} ORDER BY r.role_name", ROLE_SELECT);
        let rows = sqlx::query_as::<_, RoleRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let sql = format!("{} WHERE r.role_id = $1", ROLE_SELECT);
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(Role::from))
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let sql = format!("{} WHERE r.role_name = $1", ROLE_SELECT);
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(Role::from))
    }

    async fn create_role(&self, role: Role) -> Result<Role, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("INSERT INTO roles (role_id, role_name, created_utc) VALUES ($1, $2, $3)")
            .bind(Uuid::from(role.id))
            .bind(&role.name)
            .bind(role.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_key) SELECT $1, UNNEST($2::TEXT[])",
        )
        .bind(Uuid::from(role.id))
        .bind(permission_keys(&role.permissions))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(role)
    }

    async fn set_role_permissions(
        &self,
        id: RoleId,
        permissions: &PermissionSet,
    ) -> Result<Role, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT role_id FROM roles WHERE role_id = $1 FOR UPDATE")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

        if locked.is_none() {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound("Role".to_string()));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_key) SELECT $1, UNNEST($2::TEXT[])",
        )
        .bind(Uuid::from(id))
        .bind(permission_keys(permissions))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        self.find_role(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("Role".to_string()))
    }

    async fn delete_role(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let holders: Vec<Uuid> =
            sqlx::query_scalar("SELECT principal_id FROM principal_roles WHERE role_id = $1")
                .bind(Uuid::from(id))
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error)?;

        // Memberships and grants go with the role via ON DELETE CASCADE
        let deleted = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(StoreError::NotFound("Role".to_string()));
        }

        tx.commit().await.map_err(db_error)?;
        Ok(holders.into_iter().map(PrincipalId::from).collect())
    }

    async fn role_members(&self, id: RoleId) -> Result<Vec<PrincipalId>, StoreError> {
        self.ensure_role(id).await?;
        let holders: Vec<Uuid> =
            sqlx::query_scalar("SELECT principal_id FROM principal_roles WHERE role_id = $1")
                .bind(Uuid::from(id))
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(holders.into_iter().map(PrincipalId::from).collect())
    }
}
