//! Effective-permission resolution.
//!
//! Union of active direct grants and active group grants, minus active
//! denies. A deny always wins, even against a simultaneous direct grant.
//! Resolution is read-only and never cached inside tokens, so revocations
//! take effect on the very next check.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::models::ADMIN_PERMISSION;
use crate::store::AccessStore;

use super::AuthError;

#[derive(Clone)]
pub struct PermissionEngine {
    access: Arc<dyn AccessStore>,
}

impl PermissionEngine {
    pub fn new(access: Arc<dyn AccessStore>) -> Self {
        Self { access }
    }

    pub fn access(&self) -> Arc<dyn AccessStore> {
        self.access.clone()
    }

    /// The full named permission set, for audit/display.
    pub async fn effective_permissions(
        &self,
        principal_id: Uuid,
    ) -> Result<BTreeSet<String>, AuthError> {
        let direct = self
            .access
            .direct_grants(principal_id)
            .await
            .map_err(AuthError::Storage)?;
        let from_groups = self
            .access
            .group_granted_permissions(principal_id)
            .await
            .map_err(AuthError::Storage)?;

        let denied: BTreeSet<&str> = direct
            .iter()
            .filter(|g| g.is_denied)
            .map(|g| g.permission.as_str())
            .collect();

        let mut effective: BTreeSet<String> = BTreeSet::new();
        for grant in direct.iter().filter(|g| !g.is_denied) {
            if !denied.contains(grant.permission.as_str()) {
                effective.insert(grant.permission.clone());
            }
        }
        for name in from_groups {
            if !denied.contains(name.as_str()) {
                effective.insert(name);
            }
        }
        Ok(effective)
    }

    /// Whether the principal holds the named permission. The `admin` sentinel
    /// satisfies every check.
    pub async fn has_permission(
        &self,
        principal_id: Uuid,
        permission: &str,
    ) -> Result<bool, AuthError> {
        let effective = self.effective_permissions(principal_id).await?;
        Ok(effective.contains(permission) || effective.contains(ADMIN_PERMISSION))
    }

    /// Whether the principal holds every permission in `required`.
    pub async fn has_all(
        &self,
        principal_id: Uuid,
        required: &[String],
    ) -> Result<bool, AuthError> {
        let effective = self.effective_permissions(principal_id).await?;
        if effective.contains(ADMIN_PERMISSION) {
            return Ok(true);
        }
        Ok(required.iter().all(|p| effective.contains(p)))
    }

    /// Fail with `insufficient_permissions` unless the principal holds any of
    /// the listed permissions.
    pub async fn require_any(
        &self,
        principal_id: Uuid,
        candidates: &[&str],
    ) -> Result<(), AuthError> {
        let effective = self.effective_permissions(principal_id).await?;
        if effective.contains(ADMIN_PERMISSION)
            || candidates.iter().any(|p| effective.contains(*p))
        {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Group names the principal belongs to via active memberships.
    pub async fn groups(&self, principal_id: Uuid) -> Result<Vec<String>, AuthError> {
        self.access
            .group_names_for(principal_id)
            .await
            .map_err(AuthError::Storage)
    }

    /// Fail with `insufficient_groups` unless the principal is in every
    /// listed group.
    pub async fn require_groups(
        &self,
        principal_id: Uuid,
        required: &[&str],
    ) -> Result<(), AuthError> {
        let groups = self.groups(principal_id).await?;
        if required.iter().all(|r| groups.iter().any(|g| g == r)) {
            Ok(())
        } else {
            Err(AuthError::InsufficientGroups)
        }
    }
}
