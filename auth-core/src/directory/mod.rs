//! Directory-service boundary.
//!
//! The directory is a black box: bind-as-user plus attribute search. The
//! protocol client behind this trait is out of scope; tests and embedded
//! deployments use [`StaticDirectory`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Normalized principal attributes returned by a successful bind.
#[derive(Debug, Clone)]
pub struct DirectoryPrincipal {
    /// Foreign identity reference (DN or object id).
    pub external_id: String,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub groups: Vec<String>,
    /// False when the server truncated the group list (paging limits).
    /// Reconciliation must not deactivate memberships off a partial list.
    pub groups_complete: bool,
}

/// A raw directory entry from a search.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Directory failures. Credential rejection is distinct from infrastructure
/// failure so the sign-in strategy can tell "wrong password" from "directory
/// down".
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory rejected the credentials")]
    InvalidCredentials,

    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Bind as the given user. Success proves the password against the
    /// directory and returns the normalized principal.
    async fn bind(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryPrincipal, DirectoryError>;

    /// Search for entries matching a filter expression.
    async fn search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}

struct StaticAccount {
    password: String,
    principal: DirectoryPrincipal,
}

/// In-memory directory double for tests and embedded deployments.
///
/// Accounts are registered up front; `set_unavailable` simulates an outage
/// for fallback-policy testing.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<HashMap<String, StaticAccount>>,
    unavailable: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account. Username lookup is case-insensitive, matching
    /// common directory-server behavior.
    pub fn add_account(&self, password: &str, principal: DirectoryPrincipal) {
        self.accounts
            .lock()
            .expect("static directory mutex poisoned")
            .insert(
                principal.username.to_lowercase(),
                StaticAccount {
                    password: password.to_string(),
                    principal,
                },
            );
    }

    /// Replace the group list returned for an existing account.
    pub fn set_groups(&self, username: &str, groups: Vec<String>, complete: bool) {
        if let Some(account) = self
            .accounts
            .lock()
            .expect("static directory mutex poisoned")
            .get_mut(&username.to_lowercase())
        {
            account.principal.groups = groups;
            account.principal.groups_complete = complete;
        }
    }

    /// Simulate an outage: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn bind(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryPrincipal, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "static directory marked unavailable".to_string(),
            ));
        }

        let accounts = self
            .accounts
            .lock()
            .map_err(|e| DirectoryError::Protocol(format!("mutex poisoned: {}", e)))?;

        match accounts.get(&username.to_lowercase()) {
            Some(account) if account.password == password => Ok(account.principal.clone()),
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }

    async fn search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "static directory marked unavailable".to_string(),
            ));
        }

        // Supports the one filter shape the core issues: (uid=<username>).
        let accounts = self
            .accounts
            .lock()
            .map_err(|e| DirectoryError::Protocol(format!("mutex poisoned: {}", e)))?;

        let needle = filter
            .trim_start_matches("(uid=")
            .trim_end_matches(')')
            .to_lowercase();

        Ok(accounts
            .values()
            .filter(|a| a.principal.username.to_lowercase() == needle)
            .map(|a| {
                let mut attributes = HashMap::new();
                attributes.insert("uid".to_string(), vec![a.principal.username.clone()]);
                if let Some(email) = &a.principal.email {
                    attributes.insert("mail".to_string(), vec![email.clone()]);
                }
                attributes.insert("memberOf".to_string(), a.principal.groups.clone());
                DirectoryEntry {
                    dn: a.principal.external_id.clone(),
                    attributes,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> DirectoryPrincipal {
        DirectoryPrincipal {
            external_id: "uid=alice,ou=people,dc=example,dc=org".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.org".to_string()),
            display_name: Some("Alice Meyer".to_string()),
            department: Some("IT".to_string()),
            groups: vec!["IT Admins".to_string()],
            groups_complete: true,
        }
    }

    #[tokio::test]
    async fn bind_is_case_insensitive_on_username() {
        let dir = StaticDirectory::new();
        dir.add_account("s3cret!", alice());

        let bound = dir.bind("ALICE", "s3cret!").await.expect("bind");
        assert_eq!(bound.username, "alice");
        assert_eq!(bound.groups, vec!["IT Admins".to_string()]);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let dir = StaticDirectory::new();
        dir.add_account("s3cret!", alice());

        let err = dir.bind("alice", "nope").await.expect_err("must fail");
        assert!(matches!(err, DirectoryError::InvalidCredentials));
    }

    #[tokio::test]
    async fn outage_is_distinct_from_bad_credentials() {
        let dir = StaticDirectory::new();
        dir.add_account("s3cret!", alice());
        dir.set_unavailable(true);

        let err = dir.bind("alice", "s3cret!").await.expect_err("must fail");
        assert!(matches!(err, DirectoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn search_by_uid_returns_attributes() {
        let dir = StaticDirectory::new();
        dir.add_account("s3cret!", alice());

        let entries = dir.search("(uid=alice)").await.expect("search");
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].attributes.get("mail"),
            Some(&vec!["alice@example.org".to_string()])
        );
    }
}
