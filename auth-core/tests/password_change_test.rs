mod common;

use auth_core::config::AuthConfig;
use auth_core::models::{AuthMethod, ClientInfo};
use auth_core::services::AuthError;
use common::{directory_alice, harness, harness_with, GOOD_PASSWORD};

const NEW_PASSWORD: &str = "Fresh-Rotary-Dial-42";

#[tokio::test]
async fn change_revokes_existing_sessions_by_default() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth
        .change_password(view.id, GOOD_PASSWORD, NEW_PASSWORD)
        .await
        .expect("change");

    let err = h.auth.verify(&outcome.token).await.expect_err("must fail");
    assert!(matches!(err, AuthError::SessionExpired));

    // Old password is dead, new one works.
    assert!(h
        .auth
        .sign_in("dispatch", GOOD_PASSWORD, ClientInfo::default(), None)
        .await
        .is_err());
    h.sign_in("dispatch", NEW_PASSWORD).await;
}

#[tokio::test]
async fn sessions_survive_when_revocation_is_disabled() {
    let mut config = AuthConfig::default();
    config.session.revoke_on_password_change = false;
    let h = harness_with(config);
    let view = h.provision("dispatch", GOOD_PASSWORD).await;
    let outcome = h.sign_in("dispatch", GOOD_PASSWORD).await;

    h.auth
        .change_password(view.id, GOOD_PASSWORD, NEW_PASSWORD)
        .await
        .expect("change");
    assert!(h.auth.verify(&outcome.token).await.is_ok());
}

#[tokio::test]
async fn wrong_old_password_is_rejected() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;

    let err = h
        .auth
        .change_password(view.id, "Wrong-Password-1", NEW_PASSWORD)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::InvalidPassword));
}

#[tokio::test]
async fn policy_violations_are_rejected_with_their_own_reason() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;

    let err = h
        .auth
        .change_password(view.id, GOOD_PASSWORD, "short")
        .await
        .expect_err("must fail");
    assert_eq!(err.reason().as_str(), "password_policy");

    let err = h
        .auth
        .change_password(view.id, GOOD_PASSWORD, "no-uppercase-here-42")
        .await
        .expect_err("must fail");
    assert_eq!(err.reason().as_str(), "password_policy");
}

#[tokio::test]
async fn recent_passwords_cannot_be_reused() {
    let h = harness();
    let view = h.provision("dispatch", GOOD_PASSWORD).await;

    h.auth
        .change_password(view.id, GOOD_PASSWORD, NEW_PASSWORD)
        .await
        .expect("change");

    // Back to the original within the history window.
    let err = h
        .auth
        .change_password(view.id, NEW_PASSWORD, GOOD_PASSWORD)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::PasswordReuse));

    // The current password itself is also reuse.
    let err = h
        .auth
        .change_password(view.id, NEW_PASSWORD, NEW_PASSWORD)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::PasswordReuse));
}

#[tokio::test]
async fn directory_principals_cannot_change_a_local_password() {
    let mut config = AuthConfig::default();
    config.strategy.primary = AuthMethod::Directory;
    let h = harness_with(config);
    h.directory.add_account("s3cret!", directory_alice());
    let outcome = h.sign_in("alice", "s3cret!").await;

    let err = h
        .auth
        .change_password(outcome.principal.id, "s3cret!", NEW_PASSWORD)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AuthError::DirectoryManaged));
    assert_eq!(err.reason().as_str(), "directory_managed");
}
