//! Permission registry and grant edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel permission that satisfies every check.
pub const ADMIN_PERMISSION: &str = "admin";

/// Permission gating read access to the audit trail.
pub const AUDIT_VIEW_PERMISSION: &str = "audit-view";

/// Named permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            resource: None,
            action: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Grant of a permission to every member of a group.
#[derive(Debug, Clone)]
pub struct GroupGrant {
    pub id: Uuid,
    pub group_id: Uuid,
    pub permission_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl GroupGrant {
    pub fn new(group_id: Uuid, permission_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            permission_id,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Per-principal grant edge. Serves both direct grants (`is_denied = false`)
/// and explicit deny overrides (`is_denied = true`); an active deny suppresses
/// the permission no matter how many grants exist.
#[derive(Debug, Clone)]
pub struct PrincipalGrant {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub permission_id: Uuid,
    pub is_denied: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PrincipalGrant {
    pub fn new(principal_id: Uuid, permission_id: Uuid, is_denied: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            permission_id,
            is_denied,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Resolved per-principal grant as seen by the permission engine:
/// permission name plus the deny flag.
#[derive(Debug, Clone)]
pub struct DirectGrant {
    pub permission: String,
    pub is_denied: bool,
}
