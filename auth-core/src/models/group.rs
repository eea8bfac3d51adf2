//! Group and membership models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a group came from. Directory groups are reconciled on sign-in;
/// local and system groups are managed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOrigin {
    Directory,
    Local,
    System,
}

impl GroupOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupOrigin::Directory => "directory",
            GroupOrigin::Local => "local",
            GroupOrigin::System => "system",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "directory" => Some(GroupOrigin::Directory),
            "local" => Some(GroupOrigin::Local),
            "system" => Some(GroupOrigin::System),
            _ => None,
        }
    }
}

/// Group entity. Directory-origin groups are never deleted, only deactivated.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub origin: GroupOrigin,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, origin: GroupOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            origin,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Membership edge between a principal and a group.
#[derive(Debug, Clone)]
pub struct Membership {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub group_id: Uuid,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Membership {
    pub fn new(principal_id: Uuid, group_id: Uuid, assigned_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            group_id,
            assigned_by: assigned_by.into(),
            assigned_at: Utc::now(),
            is_active: true,
        }
    }
}

/// Assigner tag used for memberships created by directory reconciliation.
pub const DIRECTORY_SYNC_ASSIGNER: &str = "directory-sync";
