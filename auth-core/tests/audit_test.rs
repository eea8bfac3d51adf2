mod common;

use auth_core::models::{
    AuditFilter, AuditKind, ClientInfo, RISK_SIGN_IN_FAILURE, RISK_SIGN_IN_SUCCESS,
};
use auth_core::store::AuditStore;
use common::{harness, GOOD_PASSWORD};

#[tokio::test]
async fn every_sign_in_attempt_produces_exactly_one_event() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;

    h.sign_in("dispatch", GOOD_PASSWORD).await;
    let _ = h
        .auth
        .sign_in("dispatch", "Wrong-Password-1", ClientInfo::default(), None)
        .await;
    let _ = h
        .auth
        .sign_in("ghost", GOOD_PASSWORD, ClientInfo::default(), None)
        .await;

    let events = h
        .store
        .query(
            &AuditFilter {
                kind: Some(AuditKind::SignIn),
                ..AuditFilter::default()
            },
            50,
        )
        .await
        .expect("query");
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn failures_carry_the_taxonomy_reason_and_higher_risk() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;

    h.sign_in("dispatch", GOOD_PASSWORD).await;
    let _ = h
        .auth
        .sign_in("dispatch", "Wrong-Password-1", ClientInfo::default(), None)
        .await;

    let success = h
        .store
        .query(
            &AuditFilter {
                success: Some(true),
                kind: Some(AuditKind::SignIn),
                ..AuditFilter::default()
            },
            10,
        )
        .await
        .expect("query");
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].risk_score, RISK_SIGN_IN_SUCCESS);
    assert!(success[0].failure_reason.is_none());
    assert!(success[0].session_id.is_some());

    let failures = h
        .store
        .query(
            &AuditFilter {
                success: Some(false),
                kind: Some(AuditKind::SignIn),
                ..AuditFilter::default()
            },
            10,
        )
        .await
        .expect("query");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].risk_score, RISK_SIGN_IN_FAILURE);
    assert_eq!(failures[0].failure_reason.as_deref(), Some("invalid_password"));
    assert!(failures[0].risk_score > success[0].risk_score);
}

#[tokio::test]
async fn unknown_usernames_are_recorded_without_a_principal() {
    let h = harness();
    let _ = h
        .auth
        .sign_in("ghost", GOOD_PASSWORD, ClientInfo::default(), None)
        .await;

    let events = h
        .store
        .query(&AuditFilter::default(), 10)
        .await
        .expect("query");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].username, "ghost");
    assert!(events[0].principal_id.is_none());
    assert_eq!(events[0].failure_reason.as_deref(), Some("user_not_found"));
}

#[tokio::test]
async fn session_lifecycle_events_are_recorded() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth.refresh(&outcome.session_id).await.expect("refresh");
    h.auth.sign_out(&outcome.session_id).await.expect("sign out");
    h.auth
        .revoke_all_sessions(view.id)
        .await
        .expect("revoke all");

    for kind in [
        AuditKind::SessionRefresh,
        AuditKind::SignOut,
        AuditKind::SessionRevokeAll,
    ] {
        let events = h
            .store
            .query(
                &AuditFilter {
                    kind: Some(kind),
                    ..AuditFilter::default()
                },
                10,
            )
            .await
            .expect("query");
        assert_eq!(events.len(), 1, "expected one {} event", kind.as_str());
        assert_eq!(events[0].principal_id, Some(view.id));
    }
}

#[tokio::test]
async fn password_changes_are_audited_both_ways() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;

    let _ = h
        .auth
        .change_password(view.id, "Wrong-Password-1", "Fresh-Rotary-Dial-42")
        .await;
    h.auth
        .change_password(view.id, GOOD_PASSWORD, "Fresh-Rotary-Dial-42")
        .await
        .expect("change");

    let events = h
        .store
        .query(
            &AuditFilter {
                kind: Some(AuditKind::PasswordChange),
                ..AuditFilter::default()
            },
            10,
        )
        .await
        .expect("query");
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| !e.success
        && e.failure_reason.as_deref() == Some("invalid_password")));
    assert!(events.iter().any(|e| e.success));
}

#[tokio::test]
async fn filters_narrow_by_principal() {
    let h = harness();
    let a = h.provision("dispatch", GOOD_PASSWORD).await;
    h.provision("operator", GOOD_PASSWORD).await;
    h.sign_in("dispatch", GOOD_PASSWORD).await;
    h.sign_in("operator", GOOD_PASSWORD).await;

    let events = h
        .store
        .query(
            &AuditFilter {
                principal_id: Some(a.id),
                ..AuditFilter::default()
            },
            10,
        )
        .await
        .expect("query");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].username, "dispatch");
}
