//! Shared setup for auth-core integration tests.
//!
//! Wires both engines over the in-memory stores and the static directory
//! double, with grant helpers for seeding access state.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use auth_core::config::AuthConfig;
use auth_core::directory::{DirectoryPrincipal, StaticDirectory};
use auth_core::models::{ClientInfo, GroupOrigin, Permission, PrincipalView};
use auth_core::services::{AuthEngine, ElevatedAccessEngine, MockCodeSender, SignInOutcome};
use auth_core::store::{AccessStore, MemorySessionStore, MemoryStore};
use uuid::Uuid;

/// Satisfies the default password policy (length, uppercase, number).
pub const GOOD_PASSWORD: &str = "Blue-Rotary-Dial-77";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub directory: Arc<StaticDirectory>,
    pub sender: Arc<MockCodeSender>,
    pub auth: AuthEngine,
    pub elevated: ElevatedAccessEngine,
}

static TRACING: Once = Once::new();

/// Route engine traces through the test harness; `RUST_LOG` controls the
/// filter.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn harness() -> Harness {
    harness_with(AuthConfig::default())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let directory = Arc::new(StaticDirectory::new());
    let sender = Arc::new(MockCodeSender::new());

    let auth = AuthEngine::new(
        config.clone(),
        store.clone(),
        store.clone(),
        sessions.clone(),
        directory.clone(),
        store.clone(),
    );
    let elevated = ElevatedAccessEngine::new(
        config,
        store.clone(),
        auth.permission_engine(),
        auth.audit_logger(),
        sender.clone(),
    );

    Harness {
        store,
        sessions,
        directory,
        sender,
        auth,
        elevated,
    }
}

impl Harness {
    pub async fn provision(&self, username: &str, password: &str) -> PrincipalView {
        self.auth
            .provision_local(username, password, None)
            .await
            .expect("provision local principal")
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> SignInOutcome {
        self.auth
            .sign_in(username, password, ClientInfo::default(), None)
            .await
            .expect("sign in")
    }

    pub async fn grant(&self, principal_id: Uuid, name: &str) {
        let permission = self.ensure_permission(name).await;
        self.store
            .grant_principal_permission(principal_id, permission.id, false)
            .await
            .expect("grant permission");
    }

    pub async fn deny(&self, principal_id: Uuid, name: &str) {
        let permission = self.ensure_permission(name).await;
        self.store
            .grant_principal_permission(principal_id, permission.id, true)
            .await
            .expect("deny permission");
    }

    /// Put the principal in a local group carrying the permission.
    pub async fn grant_via_group(&self, principal_id: Uuid, group: &str, name: &str) {
        let group = self
            .store
            .upsert_group(group, GroupOrigin::Local)
            .await
            .expect("upsert group");
        self.store
            .add_membership(principal_id, group.id, "test-setup")
            .await
            .expect("add membership");
        self.grant_to_group(&group.name, name).await;
    }

    /// Attach a permission to a group without touching memberships, e.g. to
    /// pre-seed a directory group before the first bind.
    pub async fn grant_to_group(&self, group_name: &str, name: &str) {
        let group = self
            .store
            .upsert_group(group_name, GroupOrigin::Directory)
            .await
            .expect("upsert group");
        let permission = self.ensure_permission(name).await;
        self.store
            .grant_group_permission(group.id, permission.id)
            .await
            .expect("grant group permission");
    }

    async fn ensure_permission(&self, name: &str) -> Permission {
        if let Some(existing) = self
            .store
            .find_permission_by_name(name)
            .await
            .expect("permission lookup")
        {
            return existing;
        }
        let permission = Permission::new(name);
        self.store
            .insert_permission(&permission)
            .await
            .expect("insert permission");
        permission
    }
}

/// Directory fixture: IT administrator with one group.
pub fn directory_alice() -> DirectoryPrincipal {
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
