//! Audit trail models. Append-only; the core never mutates or deletes events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::AuthMethod;

/// Risk score attached to a successful sign-in.
pub const RISK_SIGN_IN_SUCCESS: i32 = 10;
/// Risk score attached to a failed sign-in attempt.
pub const RISK_SIGN_IN_FAILURE: i32 = 40;
/// Risk score for a granted elevated-access challenge.
/// Strictly above any normal login event.
pub const RISK_ELEVATED_GRANTED: i32 = 50;
/// Risk score for a denied elevated-access challenge.
pub const RISK_ELEVATED_DENIED: i32 = 75;
/// Risk score for a challenge the user abandoned. Distinct from a denial.
pub const RISK_ELEVATED_CANCELLED: i32 = 45;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SignIn,
    SignOut,
    SessionRefresh,
    SessionRevokeAll,
    PasswordChange,
    ElevatedChallenge,
    ElevatedOutcome,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::SignIn => "sign_in",
            AuditKind::SignOut => "sign_out",
            AuditKind::SessionRefresh => "session_refresh",
            AuditKind::SessionRevokeAll => "session_revoke_all",
            AuditKind::PasswordChange => "password_change",
            AuditKind::ElevatedChallenge => "elevated_challenge",
            AuditKind::ElevatedOutcome => "elevated_outcome",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "sign_in" => Some(AuditKind::SignIn),
            "sign_out" => Some(AuditKind::SignOut),
            "session_refresh" => Some(AuditKind::SessionRefresh),
            "session_revoke_all" => Some(AuditKind::SessionRevokeAll),
            "password_change" => Some(AuditKind::PasswordChange),
            "elevated_challenge" => Some(AuditKind::ElevatedChallenge),
            "elevated_outcome" => Some(AuditKind::ElevatedOutcome),
            _ => None,
        }
    }
}

/// Append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// None for anonymous failures (unknown username).
    pub principal_id: Option<Uuid>,
    /// Username as attempted, even when no principal matched.
    pub username: String,
    pub kind: AuditKind,
    pub method: Option<AuthMethod>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub risk_score: i32,
    pub session_id: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, username: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id: None,
            username: username.into(),
            kind,
            method: None,
            success,
            failure_reason: None,
            risk_score: 0,
            session_id: None,
            detail: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn principal(mut self, id: Uuid) -> Self {
        self.principal_id = Some(id);
        self
    }

    pub fn method(mut self, method: AuthMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn risk_score(mut self, score: i32) -> Self {
        self.risk_score = score;
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Filter for audit queries. All fields optional; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub principal_id: Option<Uuid>,
    pub kind: Option<AuditKind>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(pid) = self.principal_id {
            if event.principal_id != Some(pid) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(success) = self.success {
            if event.success != success {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at >= until {
                return false;
            }
        }
        true
    }
}
