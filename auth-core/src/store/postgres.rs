//! PostgreSQL adapter for the credential, access and audit stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::directory::DirectoryPrincipal;
use crate::models::{
    AuditEvent, AuditFilter, AuditKind, AuthMethod, DirectGrant, Group, GroupOrigin, Membership,
    Permission, Principal,
};

use super::{AccessStore, AuditStore, CredentialStore};

/// PostgreSQL-backed store. Shares one connection pool across the traits.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                anyhow::anyhow!("database health check failed: {}", e)
            })?;
        Ok(())
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    username: String,
    origin_code: String,
    email: Option<String>,
    display_name: Option<String>,
    department: Option<String>,
    is_active: bool,
    is_verified: bool,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    password_hash: Option<String>,
    directory_id: Option<String>,
    second_factor_enrolled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = anyhow::Error;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        Ok(Principal {
            id: row.principal_id,
            username: row.username,
            origin: AuthMethod::from_code(&row.origin_code)
                .ok_or_else(|| anyhow::anyhow!("unknown origin code: {}", row.origin_code))?,
            email: row.email,
            display_name: row.display_name,
            department: row.department,
            is_active: row.is_active,
            is_verified: row.is_verified,
            failed_login_attempts: row.failed_login_attempts,
            locked_until: row.locked_until,
            password_hash: row.password_hash,
            directory_id: row.directory_id,
            second_factor_enrolled: row.second_factor_enrolled,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
        })
    }
}

#[derive(FromRow)]
struct GroupRow {
    group_id: Uuid,
    group_name: String,
    origin_code: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<GroupRow> for Group {
    type Error = anyhow::Error;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(Group {
            id: row.group_id,
            name: row.group_name,
            origin: GroupOrigin::from_code(&row.origin_code)
                .ok_or_else(|| anyhow::anyhow!("unknown group origin: {}", row.origin_code))?,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct MembershipRow {
    membership_id: Uuid,
    principal_id: Uuid,
    group_id: Uuid,
    assigned_by: String,
    assigned_at: DateTime<Utc>,
    is_active: bool,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Membership {
            id: row.membership_id,
            principal_id: row.principal_id,
            group_id: row.group_id,
            assigned_by: row.assigned_by,
            assigned_at: row.assigned_at,
            is_active: row.is_active,
        }
    }
}

#[derive(FromRow)]
struct PermissionRow {
    permission_id: Uuid,
    permission_name: String,
    category: Option<String>,
    resource: Option<String>,
    action: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.permission_id,
            name: row.permission_name,
            category: row.category,
            resource: row.resource,
            action: row.action,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct AuditRow {
    event_id: Uuid,
    principal_id: Option<Uuid>,
    username: String,
    kind_code: String,
    method_code: Option<String>,
    success_flag: bool,
    failure_reason: Option<String>,
    risk_score: i32,
    session_id: Option<String>,
    detail: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = anyhow::Error;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEvent {
            id: row.event_id,
            principal_id: row.principal_id,
            username: row.username,
            kind: AuditKind::from_code(&row.kind_code)
                .ok_or_else(|| anyhow::anyhow!("unknown audit kind: {}", row.kind_code))?,
            method: row.method_code.as_deref().and_then(AuthMethod::from_code),
            success: row.success_flag,
            failure_reason: row.failure_reason,
            risk_score: row.risk_score,
            session_id: row.session_id,
            detail: serde_json::from_str(&row.detail).unwrap_or(serde_json::Value::Null),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, anyhow::Error> {
        sqlx::query_as::<_, PrincipalRow>("SELECT * FROM principals WHERE principal_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
            .map(Principal::try_from)
            .transpose()
    }

    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE lower(username) = lower($1)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .map(Principal::try_from)
        .transpose()
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO principals (
                principal_id, username, origin_code, email, display_name, department,
                is_active, is_verified, failed_login_attempts, locked_until,
                password_hash, directory_id, second_factor_enrolled,
                created_at, updated_at, last_login
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(principal.id)
        .bind(&principal.username)
        .bind(principal.origin.as_str())
        .bind(&principal.email)
        .bind(&principal.display_name)
        .bind(&principal.department)
        .bind(principal.is_active)
        .bind(principal.is_verified)
        .bind(principal.failed_login_attempts)
        .bind(principal.locked_until)
        .bind(&principal.password_hash)
        .bind(&principal.directory_id)
        .bind(principal.second_factor_enrolled)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .bind(principal.last_login)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn upsert_directory_principal(
        &self,
        bound: &DirectoryPrincipal,
    ) -> Result<Principal, anyhow::Error> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            INSERT INTO principals (
                principal_id, username, origin_code, email, display_name, department,
                is_active, is_verified, failed_login_attempts, locked_until,
                password_hash, directory_id, second_factor_enrolled,
                created_at, updated_at, last_login
            )
            VALUES ($1, $2, 'directory', $3, $4, $5,
                    TRUE, TRUE, 0, NULL, NULL, $6, FALSE, NOW(), NOW(), NULL)
            ON CONFLICT (lower(username)) DO UPDATE SET
                origin_code = 'directory',
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                department = EXCLUDED.department,
                directory_id = EXCLUDED.directory_id,
                password_hash = NULL,
                is_verified = TRUE,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&bound.username)
        .bind(&bound.email)
        .bind(&bound.display_name)
        .bind(&bound.department)
        .bind(&bound.external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Principal::try_from(row)
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE principals SET password_hash = $2, updated_at = NOW() WHERE principal_id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, anyhow::Error> {
        // Storage-level increment so concurrent attempts cannot under-count.
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE principals
            SET failed_login_attempts = failed_login_attempts + 1, updated_at = NOW()
            WHERE principal_id = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn set_lockout(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE principals SET locked_until = $2, updated_at = NOW() WHERE principal_id = $1",
        )
        .bind(id)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn reset_lockout(&self, id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE principals
            SET failed_login_attempts = 0, locked_until = NULL, updated_at = NOW()
            WHERE principal_id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE principals SET last_login = $2 WHERE principal_id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn deactivate_principal(&self, id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE principals SET is_active = FALSE, updated_at = NOW() WHERE principal_id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn set_second_factor_enrolled(
        &self,
        id: Uuid,
        enrolled: bool,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE principals
            SET second_factor_enrolled = $2, updated_at = NOW()
            WHERE principal_id = $1
            "#,
        )
        .bind(id)
        .bind(enrolled)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn append_password_history(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO password_history (history_id, principal_id, password_hash, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, anyhow::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT password_hash FROM password_history
            WHERE principal_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn find_group(&self, id: Uuid) -> Result<Option<Group>, anyhow::Error> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM groups WHERE group_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
            .map(Group::try_from)
            .transpose()
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>, anyhow::Error> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM groups WHERE group_name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
            .map(Group::try_from)
            .transpose()
    }

    async fn upsert_group(&self, name: &str, origin: GroupOrigin) -> Result<Group, anyhow::Error> {
        let row = sqlx::query_as::<_, GroupRow>(
            r#"
            INSERT INTO groups (group_id, group_name, origin_code, is_active, created_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            ON CONFLICT (group_name) DO UPDATE SET is_active = TRUE
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(origin.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Group::try_from(row)
    }

    async fn deactivate_group(&self, id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE groups SET is_active = FALSE WHERE group_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn memberships_for(&self, principal_id: Uuid) -> Result<Vec<Membership>, anyhow::Error> {
        let rows =
            sqlx::query_as::<_, MembershipRow>("SELECT * FROM memberships WHERE principal_id = $1")
                .bind(principal_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        Ok(rows.into_iter().map(Membership::from).collect())
    }

    async fn add_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
        assigned_by: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO memberships (membership_id, principal_id, group_id, assigned_by, assigned_at, is_active)
            VALUES ($1, $2, $3, $4, NOW(), TRUE)
            ON CONFLICT (principal_id, group_id) DO UPDATE SET
                is_active = TRUE,
                assigned_by = EXCLUDED.assigned_by,
                assigned_at = EXCLUDED.assigned_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(principal_id)
        .bind(group_id)
        .bind(assigned_by)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn deactivate_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE memberships SET is_active = FALSE WHERE principal_id = $1 AND group_id = $2",
        )
        .bind(principal_id)
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn find_permission_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Permission>, anyhow::Error> {
        Ok(sqlx::query_as::<_, PermissionRow>(
            "SELECT * FROM permissions WHERE permission_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .map(Permission::from))
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO permissions (permission_id, permission_name, category, resource, action, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.category)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(permission.is_active)
        .bind(permission.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn grant_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO group_permissions (grant_id, group_id, permission_id, is_active, created_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            ON CONFLICT (group_id, permission_id) DO UPDATE SET is_active = TRUE
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn grant_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
        is_denied: bool,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO principal_permissions (grant_id, principal_id, permission_id, is_denied, is_active, created_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            ON CONFLICT (principal_id, permission_id, is_denied) DO UPDATE SET is_active = TRUE
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(principal_id)
        .bind(permission_id)
        .bind(is_denied)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn revoke_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE principal_permissions SET is_active = FALSE
            WHERE principal_id = $1 AND permission_id = $2
            "#,
        )
        .bind(principal_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn group_names_for(&self, principal_id: Uuid) -> Result<Vec<String>, anyhow::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT g.group_name
            FROM memberships m
            JOIN groups g ON g.group_id = m.group_id
            WHERE m.principal_id = $1 AND m.is_active AND g.is_active
            ORDER BY g.group_name
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn group_granted_permissions(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<String>, anyhow::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.permission_name
            FROM memberships m
            JOIN groups g ON g.group_id = m.group_id
            JOIN group_permissions gp ON gp.group_id = g.group_id
            JOIN permissions p ON p.permission_id = gp.permission_id
            WHERE m.principal_id = $1
              AND m.is_active AND g.is_active AND gp.is_active AND p.is_active
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn direct_grants(&self, principal_id: Uuid) -> Result<Vec<DirectGrant>, anyhow::Error> {
        let rows = sqlx::query_as::<_, (String, bool)>(
            r#"
            SELECT p.permission_name, pp.is_denied
            FROM principal_permissions pp
            JOIN permissions p ON p.permission_id = pp.permission_id
            WHERE pp.principal_id = $1 AND pp.is_active AND p.is_active
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(rows
            .into_iter()
            .map(|(permission, is_denied)| DirectGrant {
                permission,
                is_denied,
            })
            .collect())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                event_id, principal_id, username, kind_code, method_code,
                success_flag, failure_reason, risk_score, session_id, detail, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.principal_id)
        .bind(&event.username)
        .bind(event.kind.as_str())
        .bind(event.method.map(|m| m.as_str()))
        .bind(event.success)
        .bind(&event.failure_reason)
        .bind(event.risk_score)
        .bind(&event.session_id)
        .bind(event.detail.to_string())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, anyhow::Error> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT * FROM audit_events
            WHERE ($1::uuid IS NULL OR principal_id = $1)
              AND ($2::text IS NULL OR kind_code = $2)
              AND ($3::boolean IS NULL OR success_flag = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
            ORDER BY created_at DESC
            LIMIT $6
            "#,
        )
        .bind(filter.principal_id)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.success)
        .bind(filter.since)
        .bind(filter.until)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }
}
