mod common;

use auth_core::models::{AuditFilter, AuditKind};
use auth_core::services::AuthError;
use auth_core::store::AccessStore;
use common::{harness, GOOD_PASSWORD};

#[tokio::test]
async fn deny_wins_over_a_direct_grant_in_either_order() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let carol = h.provision("carol", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    // Grant then deny.
    h.grant(bob.id, "read-numbers").await;
    h.deny(bob.id, "read-numbers").await;
    assert!(!engine
        .has_permission(bob.id, "read-numbers")
        .await
        .expect("check"));

    // Deny then grant.
    h.deny(carol.id, "read-numbers").await;
    h.grant(carol.id, "read-numbers").await;
    assert!(!engine
        .has_permission(carol.id, "read-numbers")
        .await
        .expect("check"));
}

#[tokio::test]
async fn deny_wins_over_a_group_grant() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    h.grant_via_group(bob.id, "Operators", "export-numbers").await;
    assert!(engine
        .has_permission(bob.id, "export-numbers")
        .await
        .expect("check"));

    h.deny(bob.id, "export-numbers").await;
    assert!(!engine
        .has_permission(bob.id, "export-numbers")
        .await
        .expect("check"));
}

#[tokio::test]
async fn effective_set_unions_direct_and_group_grants() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    h.grant(bob.id, "read-numbers").await;
    h.grant_via_group(bob.id, "Operators", "export-numbers").await;
    h.deny(bob.id, "manage-users").await;

    let effective = engine.effective_permissions(bob.id).await.expect("resolve");
    let names: Vec<&str> = effective.iter().map(|s| s.as_str()).collect();
    assert_eq!(names, vec!["export-numbers", "read-numbers"]);
}

#[tokio::test]
async fn revocation_takes_effect_on_the_next_check() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    h.grant(bob.id, "read-numbers").await;
    assert!(engine
        .has_permission(bob.id, "read-numbers")
        .await
        .expect("check"));

    let permission = h
        .store
        .find_permission_by_name("read-numbers")
        .await
        .expect("lookup")
        .expect("present");
    h.store
        .revoke_principal_permission(bob.id, permission.id)
        .await
        .expect("revoke");

    // No token re-issue needed; resolution is fresh per check.
    assert!(!engine
        .has_permission(bob.id, "read-numbers")
        .await
        .expect("check"));
}

#[tokio::test]
async fn deactivated_group_stops_granting() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    h.grant_via_group(bob.id, "Operators", "export-numbers").await;
    let group = h
        .store
        .find_group_by_name("Operators")
        .await
        .expect("lookup")
        .expect("present");
    h.store.deactivate_group(group.id).await.expect("deactivate");

    assert!(!engine
        .has_permission(bob.id, "export-numbers")
        .await
        .expect("check"));
    assert!(engine.groups(bob.id).await.expect("groups").is_empty());
}

#[tokio::test]
async fn group_requirements_use_their_own_failure_reason() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let engine = h.auth.permission_engine();

    h.grant_via_group(bob.id, "Operators", "export-numbers").await;

    engine
        .require_groups(bob.id, &["Operators"])
        .await
        .expect("member");
    let err = engine
        .require_groups(bob.id, &["Operators", "Supervisors"])
        .await
        .expect_err("must fail");
    assert_eq!(err.reason().as_str(), "insufficient_groups");
}

#[tokio::test]
async fn audit_reads_are_gated() {
    let h = harness();
    let bob = h.provision("bob", GOOD_PASSWORD).await;
    let auditor = h.provision("auditor", GOOD_PASSWORD).await;
    h.sign_in("bob", GOOD_PASSWORD).await;

    let err = h
        .auth
        .audit_events(bob.id, &AuditFilter::default(), 10)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::InsufficientPermissions));

    h.grant(auditor.id, "audit-view").await;
    let events = h
        .auth
        .audit_events(auditor.id, &AuditFilter::default(), 10)
        .await
        .expect("query");
    assert!(events
        .iter()
        .any(|e| e.kind == AuditKind::SignIn && e.success));
}
