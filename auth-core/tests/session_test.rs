mod common;

use auth_core::services::{hash_token, AuthError};
use auth_core::store::{CredentialStore, SessionStore};
use chrono::{Duration, Utc};
use common::{harness, GOOD_PASSWORD};

#[tokio::test]
async fn revoked_session_fails_verify_despite_valid_token() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth.sign_out(&outcome.session_id).await.expect("sign out");

    // The token is still within its cryptographic validity window; the
    // server-side session record is what kills it.
    let err = h.auth.verify(&outcome.token).await.expect_err("must fail");
    assert!(matches!(err, AuthError::SessionExpired));
}

#[tokio::test]
async fn tampered_token_is_rejected_as_invalid() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    let mut tampered = outcome.token.clone();
    tampered.pop();
    tampered.push('A');
    let err = h.auth.verify(&tampered).await.expect_err("must fail");
    assert!(matches!(err, AuthError::TokenInvalid));
}

#[tokio::test]
async fn raw_token_is_never_stored_on_the_session() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    let session = h
        .sessions
        .get(&outcome.session_id)
        .await
        .expect("get")
        .expect("present");
    assert_ne!(session.token_hash, outcome.token);
    assert_eq!(session.token_hash, hash_token(&outcome.token));
}

#[tokio::test]
async fn expired_session_is_lazily_deactivated() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.sessions
        .set_expiry(&outcome.session_id, Utc::now() - Duration::minutes(1))
        .await
        .expect("set expiry");

    let err = h.auth.verify(&outcome.token).await.expect_err("must fail");
    assert!(matches!(err, AuthError::SessionExpired));

    let session = h
        .sessions
        .get(&outcome.session_id)
        .await
        .expect("get")
        .expect("present");
    assert!(!session.is_active);
}

#[tokio::test]
async fn refresh_extends_a_live_session_by_a_full_ttl() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    // Simulate a session nearing its end.
    h.sessions
        .set_expiry(&outcome.session_id, Utc::now() + Duration::hours(1))
        .await
        .expect("set expiry");

    let new_expiry = h.auth.refresh(&outcome.session_id).await.expect("refresh");
    let expected = Utc::now() + Duration::hours(24);
    assert!((new_expiry - expected).num_seconds().abs() < 5);

    // Token and session id survive; only the expiry moves.
    let verified = h.auth.verify(&outcome.token).await.expect("verify");
    assert_eq!(verified.session_id, outcome.session_id);
}

#[tokio::test]
async fn refresh_of_a_revoked_session_is_rejected() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth.sign_out(&outcome.session_id).await.expect("sign out");
    let err = h
        .auth
        .refresh(&outcome.session_id)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::SessionExpired));
}

#[tokio::test]
async fn revoke_all_kills_every_session_of_the_principal() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;
    let first = h.sign_in("dispatch", GOOD_PASSWORD).await;
    let second = h.sign_in("dispatch", GOOD_PASSWORD).await;
    assert_ne!(first.session_id, second.session_id);

    let revoked = h
        .auth
        .revoke_all_sessions(view.id)
        .await
        .expect("revoke all");
    assert_eq!(revoked, 2);

    assert!(h.auth.verify(&first.token).await.is_err());
    assert!(h.auth.verify(&second.token).await.is_err());
}

#[tokio::test]
async fn deactivated_principal_fails_verify_on_a_live_session() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.store
        .deactivate_principal(view.id)
        .await
        .expect("deactivate");

    let err = h.auth.verify(&outcome.token).await.expect_err("must fail");
    assert!(matches!(err, AuthError::AccountDisabled));
}

#[tokio::test]
async fn flagging_a_session_marks_it_suspicious_without_revoking() {
    let h = harness();
    h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth
        .flag_session_suspicious(&outcome.session_id)
        .await
        .expect("flag");

    let session = h
        .sessions
        .get(&outcome.session_id)
        .await
        .expect("get")
        .expect("present");
    assert!(session.is_suspicious);
    assert!(h.auth.verify(&outcome.token).await.is_ok());
}
