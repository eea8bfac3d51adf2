//! Principal model - local credential accounts and directory-origin accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authentication method / account origin tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Local,
    Directory,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Local => "local",
            AuthMethod::Directory => "directory",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "local" => Some(AuthMethod::Local),
            "directory" => Some(AuthMethod::Directory),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Principal entity.
///
/// Local principals carry a password hash; directory principals carry a
/// foreign identity reference and are upserted on every successful bind.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub origin: AuthMethod,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    /// PHC-format Argon2 hash (salt embedded). Local principals only.
    pub password_hash: Option<String>,
    /// Foreign identity reference (directory DN or object id). Directory principals only.
    pub directory_id: Option<String>,
    /// Whether the one-time-code challenge factor is enrolled.
    pub second_factor_enrolled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Principal {
    /// Create a new local principal with an already-hashed password.
    pub fn new_local(username: String, password_hash: String, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            origin: AuthMethod::Local,
            email,
            display_name: None,
            department: None,
            is_active: true,
            is_verified: true,
            failed_login_attempts: 0,
            locked_until: None,
            password_hash: Some(password_hash),
            directory_id: None,
            second_factor_enrolled: false,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    /// Whether a lockout is currently in force.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Convert to sanitized view (no credential material).
    pub fn sanitized(&self) -> PrincipalView {
        PrincipalView {
            id: self.id,
            username: self.username.clone(),
            origin: self.origin,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            department: self.department.clone(),
            is_active: self.is_active,
            is_verified: self.is_verified,
            last_login: self.last_login,
        }
    }
}

/// Principal view handed across the UI boundary (no sensitive fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalView {
    pub id: Uuid,
    pub username: String,
    pub origin: AuthMethod,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lockout_window_is_inclusive_of_future_only() {
        let mut p = Principal::new_local("carol".into(), "$argon2id$stub".into(), None);
        let now = Utc::now();
        assert!(!p.is_locked(now));

        p.locked_until = Some(now + Duration::minutes(30));
        assert!(p.is_locked(now));

        p.locked_until = Some(now - Duration::seconds(1));
        assert!(!p.is_locked(now));
    }

    #[test]
    fn sanitized_view_drops_credential_material() {
        let p = Principal::new_local("carol".into(), "$argon2id$stub".into(), None);
        let view = p.sanitized();
        let json = serde_json::to_string(&view).expect("serialize view");
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password"));
    }
}
