//! Error types and the stable failure taxonomy.
//!
//! The taxonomy crosses the UI boundary as strings, so its members are fixed;
//! `AuthError` is the richer internal type and maps onto it via `reason()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::policy::PolicyError;

/// Stable failure reasons surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UserNotFound,
    InvalidPassword,
    AccountDisabled,
    AccountLocked,
    LdapAuthFailed,
    LdapError,
    SessionExpired,
    TokenInvalid,
    InsufficientPermissions,
    InsufficientGroups,
    AllMethodsFailed,
    UserCancelled,
    SystemError,
    DirectoryManaged,
    PasswordReuse,
    PasswordPolicy,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UserNotFound => "user_not_found",
            FailureReason::InvalidPassword => "invalid_password",
            FailureReason::AccountDisabled => "account_disabled",
            FailureReason::AccountLocked => "account_locked",
            FailureReason::LdapAuthFailed => "ldap_auth_failed",
            FailureReason::LdapError => "ldap_error",
            FailureReason::SessionExpired => "session_expired",
            FailureReason::TokenInvalid => "token_invalid",
            FailureReason::InsufficientPermissions => "insufficient_permissions",
            FailureReason::InsufficientGroups => "insufficient_groups",
            FailureReason::AllMethodsFailed => "all_methods_failed",
            FailureReason::UserCancelled => "user_cancelled",
            FailureReason::SystemError => "system_error",
            FailureReason::DirectoryManaged => "directory_managed",
            FailureReason::PasswordReuse => "password_reuse",
            FailureReason::PasswordPolicy => "password_policy",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication core errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Directory rejected credentials")]
    DirectoryAuthFailed,

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(#[source] anyhow::Error),

    #[error("Session expired or revoked")]
    SessionExpired,

    #[error("Token invalid")]
    TokenInvalid,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Insufficient groups")]
    InsufficientGroups,

    #[error("All sign-in methods failed")]
    AllMethodsFailed,

    #[error("Password is managed by the directory service")]
    DirectoryManaged,

    #[error("Password was used recently")]
    PasswordReuse,

    #[error("Password policy violation: {0}")]
    PolicyViolation(#[from] PolicyError),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(#[source] anyhow::Error),
}

impl AuthError {
    /// Map to the stable taxonomy member the UI layer receives.
    pub fn reason(&self) -> FailureReason {
        match self {
            AuthError::UserNotFound => FailureReason::UserNotFound,
            AuthError::InvalidPassword => FailureReason::InvalidPassword,
            AuthError::AccountDisabled => FailureReason::AccountDisabled,
            AuthError::AccountLocked { .. } => FailureReason::AccountLocked,
            AuthError::DirectoryAuthFailed => FailureReason::LdapAuthFailed,
            AuthError::DirectoryUnavailable(_) => FailureReason::LdapError,
            AuthError::SessionExpired => FailureReason::SessionExpired,
            AuthError::TokenInvalid => FailureReason::TokenInvalid,
            AuthError::InsufficientPermissions => FailureReason::InsufficientPermissions,
            AuthError::InsufficientGroups => FailureReason::InsufficientGroups,
            AuthError::AllMethodsFailed => FailureReason::AllMethodsFailed,
            AuthError::DirectoryManaged => FailureReason::DirectoryManaged,
            AuthError::PasswordReuse => FailureReason::PasswordReuse,
            AuthError::PolicyViolation(_) => FailureReason::PasswordPolicy,
            AuthError::Storage(_) | AuthError::Config(_) => FailureReason::SystemError,
        }
    }

    /// Message safe to show to the caller. Infrastructure failures collapse to
    /// a generic message; the detail stays in server-side logs.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::DirectoryUnavailable(_) | AuthError::Storage(_) | AuthError::Config(_) => {
                "A temporary system error occurred. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Infrastructure-class failure: the method was unavailable rather than
    /// the credentials being definitively wrong. Drives the
    /// `FallbackPolicy::OnUnavailable` decision.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AuthError::DirectoryUnavailable(_) | AuthError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_serialize_as_snake_case_strings() {
        assert_eq!(FailureReason::LdapAuthFailed.as_str(), "ldap_auth_failed");
        assert_eq!(
            serde_json::to_string(&FailureReason::AllMethodsFailed).expect("serialize"),
            "\"all_methods_failed\""
        );
    }

    #[test]
    fn infrastructure_errors_surface_generically() {
        let err = AuthError::DirectoryUnavailable(anyhow::anyhow!("connect refused 10.0.0.9:636"));
        assert_eq!(err.reason(), FailureReason::LdapError);
        assert!(!err.public_message().contains("10.0.0.9"));
        assert!(err.is_unavailable());
        assert!(!AuthError::InvalidPassword.is_unavailable());
    }
}
