//! Persistence boundaries.
//!
//! Each store is an async trait with a production adapter (Postgres for
//! credential/access/audit data, Redis for the session cache) and an
//! in-memory double used by tests and embedded deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::directory::DirectoryPrincipal;
use crate::models::{
    AuditEvent, AuditFilter, DirectGrant, Group, GroupOrigin, Membership, Permission, Principal,
    Session,
};

mod memory;
mod postgres;
mod redis_session;

pub use memory::{MemorySessionStore, MemoryStore};
pub use postgres::PgStore;
pub use redis_session::RedisSessionStore;

/// Local-account credential persistence: principals, lockout counters,
/// password history.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, anyhow::Error>;

    /// Username comparison is case-insensitive.
    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error>;

    async fn insert_principal(&self, principal: &Principal) -> Result<(), anyhow::Error>;

    /// Upsert from a successful directory bind, keyed on username. Returns
    /// the stored principal (existing id preserved on update).
    async fn upsert_directory_principal(
        &self,
        bound: &DirectoryPrincipal,
    ) -> Result<Principal, anyhow::Error>;

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error>;

    /// Atomic storage-level increment; returns the post-increment count.
    /// Must not be read-then-write, or concurrent attempts under-count and
    /// bypass lockout.
    async fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, anyhow::Error>;

    async fn set_lockout(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), anyhow::Error>;

    /// Zero the counter and clear `locked_until`.
    async fn reset_lockout(&self, id: Uuid) -> Result<(), anyhow::Error>;

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn deactivate_principal(&self, id: Uuid) -> Result<(), anyhow::Error>;

    /// Enroll or unenroll the one-time-code challenge factor.
    async fn set_second_factor_enrolled(
        &self,
        id: Uuid,
        enrolled: bool,
    ) -> Result<(), anyhow::Error>;

    async fn append_password_history(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error>;

    /// Most recent first.
    async fn recent_password_hashes(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, anyhow::Error>;
}

/// Groups, memberships, permissions and grant edges.
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn find_group(&self, id: Uuid) -> Result<Option<Group>, anyhow::Error>;

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>, anyhow::Error>;

    /// Find-or-create a group with the given origin; reactivates a
    /// deactivated group of the same name.
    async fn upsert_group(&self, name: &str, origin: GroupOrigin) -> Result<Group, anyhow::Error>;

    async fn deactivate_group(&self, id: Uuid) -> Result<(), anyhow::Error>;

    /// All membership rows for a principal, active and inactive.
    async fn memberships_for(&self, principal_id: Uuid) -> Result<Vec<Membership>, anyhow::Error>;

    /// Add (or reactivate) a membership.
    async fn add_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
        assigned_by: &str,
    ) -> Result<(), anyhow::Error>;

    async fn deactivate_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
    ) -> Result<(), anyhow::Error>;

    async fn find_permission_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Permission>, anyhow::Error>;

    async fn insert_permission(&self, permission: &Permission) -> Result<(), anyhow::Error>;

    async fn grant_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error>;

    /// Add a per-principal grant edge; `is_denied = true` records an explicit
    /// deny override.
    async fn grant_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
        is_denied: bool,
    ) -> Result<(), anyhow::Error>;

    async fn revoke_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error>;

    /// Names of active groups the principal belongs to via active memberships.
    async fn group_names_for(&self, principal_id: Uuid) -> Result<Vec<String>, anyhow::Error>;

    /// Permission names granted through active group grants on active groups
    /// reached via active memberships. May contain duplicates.
    async fn group_granted_permissions(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<String>, anyhow::Error>;

    /// Active per-principal grant edges (both grants and denies) with their
    /// permission names.
    async fn direct_grants(&self, principal_id: Uuid) -> Result<Vec<DirectGrant>, anyhow::Error>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error>;

    /// Newest first, capped at `limit`.
    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, anyhow::Error>;
}

/// Pluggable session cache keyed by session id.
///
/// Store-level TTL is a hygiene mechanism only; liveness is decided by the
/// record's own `expires_at`/`is_active`, checked on every verify.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error>;

    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error>;

    /// Update `last_activity` only. Never extends `expires_at`.
    async fn touch_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error>;

    /// Explicit refresh: replace `expires_at`.
    async fn set_expiry(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error>;

    async fn deactivate(&self, session_id: &str) -> Result<(), anyhow::Error>;

    /// Returns the number of sessions deactivated.
    async fn deactivate_all_for(&self, principal_id: Uuid) -> Result<u64, anyhow::Error>;

    async fn flag_suspicious(&self, session_id: &str) -> Result<(), anyhow::Error>;

    /// Remove records past expiry. Optional hygiene; liveness never depends
    /// on it. Returns the number removed.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;
}
