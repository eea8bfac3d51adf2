mod common;

use auth_core::config::AuthConfig;
use auth_core::models::AuthMethod;
use common::{directory_alice, harness_with};

fn directory_first() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.strategy.primary = AuthMethod::Directory;
    config
}

#[tokio::test]
async fn groups_follow_the_directory_across_sign_ins() {
    let h = harness_with(directory_first());
    h.directory.add_account("s3cret!", directory_alice());

    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(outcome.groups, vec!["IT Admins".to_string()]);

    // Directory moves her to a different team.
    h.directory.set_groups(
        "alice",
        vec!["Network Ops".to_string()],
        true,
    );
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(outcome.groups, vec!["Network Ops".to_string()]);
}

#[tokio::test]
async fn local_memberships_survive_directory_reconciliation() {
    let h = harness_with(directory_first());
    h.directory.add_account("s3cret!", directory_alice());

    let outcome = h.sign_in("alice", "s3cret!").await;
    h.grant_via_group(outcome.principal.id, "Pilot Testers", "read-numbers")
        .await;

    // Directory drops all her groups; the locally assigned one stays.
    h.directory.set_groups("alice", vec![], true);
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(outcome.groups, vec!["Pilot Testers".to_string()]);
    assert!(outcome.permissions.contains(&"read-numbers".to_string()));
}

#[tokio::test]
async fn partial_group_lists_never_deactivate_memberships() {
    let h = harness_with(directory_first());
    h.directory.add_account("s3cret!", directory_alice());
    h.sign_in("alice", "s3cret!").await;

    // The server truncated the list; only additions are applied.
    h.directory
        .set_groups("alice", vec!["Network Ops".to_string()], false);
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(
        outcome.groups,
        vec!["IT Admins".to_string(), "Network Ops".to_string()]
    );

    // Once a complete list arrives, the stale membership goes.
    h.directory
        .set_groups("alice", vec!["Network Ops".to_string()], true);
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(outcome.groups, vec!["Network Ops".to_string()]);
}

#[tokio::test]
async fn reinstated_groups_reactivate_the_old_membership() {
    let h = harness_with(directory_first());
    h.directory.add_account("s3cret!", directory_alice());
    h.sign_in("alice", "s3cret!").await;

    h.directory.set_groups("alice", vec![], true);
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert!(outcome.groups.is_empty());

    h.directory
        .set_groups("alice", vec!["IT Admins".to_string()], true);
    let outcome = h.sign_in("alice", "s3cret!").await;
    assert_eq!(outcome.groups, vec!["IT Admins".to_string()]);
}

#[tokio::test]
async fn repeated_binds_update_profile_attributes_in_place() {
    let h = harness_with(directory_first());
    let mut alice = directory_alice();
    h.directory.add_account("s3cret!", alice.clone());
    let first = h.sign_in("alice", "s3cret!").await;

    alice.department = Some("Network Engineering".to_string());
    h.directory.add_account("s3cret!", alice);
    let second = h.sign_in("alice", "s3cret!").await;

    assert_eq!(first.principal.id, second.principal.id);
    assert_eq!(
        second.principal.department.as_deref(),
        Some("Network Engineering")
    );
}
