//! In-memory store adapters for tests and embedded deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::directory::DirectoryPrincipal;
use crate::models::{
    AuditEvent, AuditFilter, AuthMethod, DirectGrant, Group, GroupGrant, GroupOrigin, Membership,
    Permission, Principal, PrincipalGrant, Session,
};

use super::{AccessStore, AuditStore, CredentialStore, SessionStore};

#[derive(Default)]
struct Tables {
    principals: HashMap<Uuid, Principal>,
    password_history: HashMap<Uuid, Vec<(DateTime<Utc>, String)>>,
    groups: HashMap<Uuid, Group>,
    memberships: Vec<Membership>,
    permissions: HashMap<Uuid, Permission>,
    group_grants: Vec<GroupGrant>,
    principal_grants: Vec<PrincipalGrant>,
    audit_events: Vec<AuditEvent>,
}

/// Single-process credential/access/audit store.
///
/// All mutations happen under one mutex, so the failed-attempt increment is
/// atomic by construction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, anyhow::Error> {
        self.tables
            .lock()
            .map_err(|e| anyhow::anyhow!("memory store mutex poisoned: {}", e))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, anyhow::Error> {
        Ok(self.lock()?.principals.get(&id).cloned())
    }

    async fn find_principal_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error> {
        let needle = username.to_lowercase();
        Ok(self
            .lock()?
            .principals
            .values()
            .find(|p| p.username.to_lowercase() == needle)
            .cloned())
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let needle = principal.username.to_lowercase();
        if tables
            .principals
            .values()
            .any(|p| p.username.to_lowercase() == needle)
        {
            return Err(anyhow::anyhow!(
                "username already exists: {}",
                principal.username
            ));
        }
        tables.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn upsert_directory_principal(
        &self,
        bound: &DirectoryPrincipal,
    ) -> Result<Principal, anyhow::Error> {
        let mut tables = self.lock()?;
        let needle = bound.username.to_lowercase();
        let now = Utc::now();

        if let Some(existing) = tables
            .principals
            .values_mut()
            .find(|p| p.username.to_lowercase() == needle)
        {
            existing.origin = AuthMethod::Directory;
            existing.email = bound.email.clone();
            existing.display_name = bound.display_name.clone();
            existing.department = bound.department.clone();
            existing.directory_id = Some(bound.external_id.clone());
            // The directory owns the credential now; a leftover local hash
            // must not keep authenticating.
            existing.password_hash = None;
            existing.is_verified = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let principal = Principal {
            id: Uuid::new_v4(),
            username: bound.username.clone(),
            origin: AuthMethod::Directory,
            email: bound.email.clone(),
            display_name: bound.display_name.clone(),
            department: bound.department.clone(),
            is_active: true,
            is_verified: true,
            failed_login_attempts: 0,
            locked_until: None,
            password_hash: None,
            directory_id: Some(bound.external_id.clone()),
            second_factor_enrolled: false,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        tables.principals.insert(principal.id, principal.clone());
        Ok(principal)
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.password_hash = Some(hash.to_string());
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.failed_login_attempts += 1;
        Ok(principal.failed_login_attempts)
    }

    async fn set_lockout(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.locked_until = Some(until);
        Ok(())
    }

    async fn reset_lockout(&self, id: Uuid) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.failed_login_attempts = 0;
        principal.locked_until = None;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.last_login = Some(at);
        Ok(())
    }

    async fn deactivate_principal(&self, id: Uuid) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.is_active = false;
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn set_second_factor_enrolled(
        &self,
        id: Uuid,
        enrolled: bool,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let principal = tables
            .principals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("principal not found: {}", id))?;
        principal.second_factor_enrolled = enrolled;
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn append_password_history(&self, id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        self.lock()?
            .password_history
            .entry(id)
            .or_default()
            .push((Utc::now(), hash.to_string()));
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, anyhow::Error> {
        let tables = self.lock()?;
        let mut entries = tables.password_history.get(&id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().take(limit).map(|(_, h)| h).collect())
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn find_group(&self, id: Uuid) -> Result<Option<Group>, anyhow::Error> {
        Ok(self.lock()?.groups.get(&id).cloned())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>, anyhow::Error> {
        Ok(self
            .lock()?
            .groups
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn upsert_group(&self, name: &str, origin: GroupOrigin) -> Result<Group, anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.groups.values_mut().find(|g| g.name == name) {
            existing.is_active = true;
            return Ok(existing.clone());
        }
        let group = Group::new(name.to_string(), origin);
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn deactivate_group(&self, id: Uuid) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(group) = tables.groups.get_mut(&id) {
            group.is_active = false;
        }
        Ok(())
    }

    async fn memberships_for(&self, principal_id: Uuid) -> Result<Vec<Membership>, anyhow::Error> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .filter(|m| m.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn add_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
        assigned_by: &str,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .memberships
            .iter_mut()
            .find(|m| m.principal_id == principal_id && m.group_id == group_id)
        {
            existing.is_active = true;
            existing.assigned_by = assigned_by.to_string();
            existing.assigned_at = Utc::now();
            return Ok(());
        }
        tables
            .memberships
            .push(Membership::new(principal_id, group_id, assigned_by));
        Ok(())
    }

    async fn deactivate_membership(
        &self,
        principal_id: Uuid,
        group_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .memberships
            .iter_mut()
            .find(|m| m.principal_id == principal_id && m.group_id == group_id)
        {
            existing.is_active = false;
        }
        Ok(())
    }

    async fn find_permission_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Permission>, anyhow::Error> {
        Ok(self
            .lock()?
            .permissions
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if tables
            .permissions
            .values()
            .any(|p| p.name == permission.name)
        {
            return Err(anyhow::anyhow!(
                "permission already exists: {}",
                permission.name
            ));
        }
        tables.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn grant_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .group_grants
            .iter_mut()
            .find(|g| g.group_id == group_id && g.permission_id == permission_id)
        {
            existing.is_active = true;
            return Ok(());
        }
        tables
            .group_grants
            .push(GroupGrant::new(group_id, permission_id));
        Ok(())
    }

    async fn grant_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
        is_denied: bool,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.principal_grants.iter_mut().find(|g| {
            g.principal_id == principal_id
                && g.permission_id == permission_id
                && g.is_denied == is_denied
        }) {
            existing.is_active = true;
            return Ok(());
        }
        tables
            .principal_grants
            .push(PrincipalGrant::new(principal_id, permission_id, is_denied));
        Ok(())
    }

    async fn revoke_principal_permission(
        &self,
        principal_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        for grant in tables
            .principal_grants
            .iter_mut()
            .filter(|g| g.principal_id == principal_id && g.permission_id == permission_id)
        {
            grant.is_active = false;
        }
        Ok(())
    }

    async fn group_names_for(&self, principal_id: Uuid) -> Result<Vec<String>, anyhow::Error> {
        let tables = self.lock()?;
        let mut names: Vec<String> = tables
            .memberships
            .iter()
            .filter(|m| m.principal_id == principal_id && m.is_active)
            .filter_map(|m| tables.groups.get(&m.group_id))
            .filter(|g| g.is_active)
            .map(|g| g.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn group_granted_permissions(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<String>, anyhow::Error> {
        let tables = self.lock()?;
        let group_ids: Vec<Uuid> = tables
            .memberships
            .iter()
            .filter(|m| m.principal_id == principal_id && m.is_active)
            .filter(|m| {
                tables
                    .groups
                    .get(&m.group_id)
                    .map(|g| g.is_active)
                    .unwrap_or(false)
            })
            .map(|m| m.group_id)
            .collect();

        Ok(tables
            .group_grants
            .iter()
            .filter(|g| g.is_active && group_ids.contains(&g.group_id))
            .filter_map(|g| tables.permissions.get(&g.permission_id))
            .filter(|p| p.is_active)
            .map(|p| p.name.clone())
            .collect())
    }

    async fn direct_grants(&self, principal_id: Uuid) -> Result<Vec<DirectGrant>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .principal_grants
            .iter()
            .filter(|g| g.is_active && g.principal_id == principal_id)
            .filter_map(|g| {
                tables
                    .permissions
                    .get(&g.permission_id)
                    .filter(|p| p.is_active)
                    .map(|p| DirectGrant {
                        permission: p.name.clone(),
                        is_denied: g.is_denied,
                    })
            })
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), anyhow::Error> {
        self.lock()?.audit_events.push(event.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, anyhow::Error> {
        let tables = self.lock()?;
        let mut events: Vec<AuditEvent> = tables
            .audit_events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }
}

/// In-process session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, anyhow::Error> {
        self.sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("session store mutex poisoned: {}", e))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error> {
        self.lock()?.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn touch_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        if let Some(session) = self.lock()?.get_mut(session_id) {
            session.last_activity = at;
        }
        Ok(())
    }

    async fn set_expiry(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        if let Some(session) = self.lock()?.get_mut(session_id) {
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn deactivate(&self, session_id: &str) -> Result<(), anyhow::Error> {
        if let Some(session) = self.lock()?.get_mut(session_id) {
            session.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_all_for(&self, principal_id: Uuid) -> Result<u64, anyhow::Error> {
        let mut sessions = self.lock()?;
        let mut count = 0u64;
        for session in sessions.values_mut() {
            if session.principal_id == principal_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn flag_suspicious(&self, session_id: &str) -> Result<(), anyhow::Error> {
        if let Some(session) = self.lock()?.get_mut(session_id) {
            session.is_suspicious = true;
        }
        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientInfo;
    use chrono::Duration;

    #[tokio::test]
    async fn username_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        let principal = Principal::new_local("Dispatch".into(), "$argon2id$stub".into(), None);
        store.insert_principal(&principal).await.expect("insert");

        let found = store
            .find_principal_by_username("dIsPaTcH")
            .await
            .expect("lookup");
        assert_eq!(found.map(|p| p.id), Some(principal.id));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected_case_insensitively() {
        let store = MemoryStore::new();
        let first = Principal::new_local("ops".into(), "$argon2id$stub".into(), None);
        store.insert_principal(&first).await.expect("insert");

        let dup = Principal::new_local("OPS".into(), "$argon2id$stub".into(), None);
        assert!(store.insert_principal(&dup).await.is_err());
    }

    #[tokio::test]
    async fn increment_returns_post_increment_count() {
        let store = MemoryStore::new();
        let principal = Principal::new_local("ops".into(), "$argon2id$stub".into(), None);
        store.insert_principal(&principal).await.expect("insert");

        assert_eq!(
            store
                .increment_failed_attempts(principal.id)
                .await
                .expect("inc"),
            1
        );
        assert_eq!(
            store
                .increment_failed_attempts(principal.id)
                .await
                .expect("inc"),
            2
        );

        store.reset_lockout(principal.id).await.expect("reset");
        let reloaded = store
            .find_principal(principal.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(reloaded.failed_login_attempts, 0);
        assert!(reloaded.locked_until.is_none());
    }

    #[tokio::test]
    async fn directory_upsert_clears_a_stale_local_hash() {
        let store = MemoryStore::new();
        let local = Principal::new_local("alice".into(), "$argon2id$stub".into(), None);
        store.insert_principal(&local).await.expect("insert");

        let bound = DirectoryPrincipal {
            external_id: "uid=alice,ou=people,dc=example,dc=org".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.org".to_string()),
            display_name: None,
            department: None,
            groups: vec![],
            groups_complete: true,
        };
        let updated = store
            .upsert_directory_principal(&bound)
            .await
            .expect("upsert");

        assert_eq!(updated.id, local.id);
        assert_eq!(updated.origin, AuthMethod::Directory);
        assert!(updated.password_hash.is_none());
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired_sessions() {
        let store = MemorySessionStore::new();
        let live = Session::new(
            Uuid::new_v4(),
            "h1".into(),
            AuthMethod::Local,
            Duration::hours(1),
            ClientInfo::default(),
        );
        let mut dead = Session::new(
            Uuid::new_v4(),
            "h2".into(),
            AuthMethod::Local,
            Duration::hours(1),
            ClientInfo::default(),
        );
        dead.expires_at = Utc::now() - Duration::minutes(1);

        store.insert(&live).await.expect("insert");
        store.insert(&dead).await.expect("insert");

        let removed = store.cleanup_expired(Utc::now()).await.expect("cleanup");
        assert_eq!(removed, 1);
        assert!(store.get(&live.id).await.expect("get").is_some());
        assert!(store.get(&dead.id).await.expect("get").is_none());
    }
}
