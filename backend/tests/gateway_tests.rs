mod common;

use common::{PASSWORD, harness};
use community_portal::{AuthError, models::GlobalRole};
use uuid::Uuid;

#[tokio::test]
async fn test_login_issues_verifiable_pair() {
    let h = harness();
    let account = h.signup("pair").await;

    let pair = h.gateway.login("pair", PASSWORD).await.unwrap();
    assert_eq!(pair.access_expires_in, h.config.access_token_ttl_secs);

    let authenticated = h.gateway.authenticate(&pair.access_token).await.unwrap();
    assert_eq!(authenticated, account);
}

#[tokio::test]
async fn test_login_failures() {
    let h = harness();
    h.signup("login-fail").await;

    assert_eq!(
        h.gateway
            .login("login-fail", "wrong-password-1")
            .await
            .unwrap_err(),
        AuthError::InvalidCredentials
    );
    assert_eq!(
        h.gateway.login("ghost", PASSWORD).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
}

#[tokio::test]
async fn test_refreshed_access_token_authenticates() {
    let h = harness();
    let account = h.signup("renewed").await;
    let first = h.gateway.login("renewed", PASSWORD).await.unwrap();
    let second = h.gateway.refresh(&first.refresh_token).await.unwrap();

    assert_ne!(first.access_token, second.access_token);
    assert_eq!(
        h.gateway.authenticate(&second.access_token).await.unwrap().id,
        account.id
    );
}

#[tokio::test]
async fn test_authenticate_reflects_current_account_state() {
    let h = harness();
    let admin = h.signup_admin("root").await;
    let account = h.signup("target").await;
    let access = h.gateway.login("target", PASSWORD).await.unwrap().access_token;

    // Promotion shows up without a new token.
    h.gateway
        .set_global_role(&admin, account.id, GlobalRole::Admin)
        .await
        .unwrap();
    assert_eq!(
        h.gateway.authenticate(&access).await.unwrap().global_role,
        GlobalRole::Admin
    );

    // So does deactivation.
    h.gateway
        .set_account_active(&admin, account.id, false)
        .await
        .unwrap();
    assert_eq!(
        h.gateway.authenticate(&access).await.unwrap_err(),
        AuthError::AccountDisabled
    );
}

#[tokio::test]
async fn test_deactivation_revokes_sessions_and_blocks_login() {
    let h = harness();
    let admin = h.signup_admin("admin").await;
    let account = h.signup("banned-user").await;
    let token = h.gateway.login("banned-user", PASSWORD).await.unwrap().refresh_token;

    let updated = h
        .gateway
        .set_account_active(&admin, account.id, false)
        .await
        .unwrap();
    assert!(!updated.active);

    assert_eq!(h.gateway.refresh(&token).await.unwrap_err(), AuthError::Revoked);
    assert_eq!(
        h.gateway.login("banned-user", PASSWORD).await.unwrap_err(),
        AuthError::AccountDisabled
    );

    // Reactivation restores login, not the revoked sessions.
    h.gateway
        .set_account_active(&admin, account.id, true)
        .await
        .unwrap();
    assert!(h.gateway.login("banned-user", PASSWORD).await.is_ok());
    assert_eq!(h.gateway.refresh(&token).await.unwrap_err(), AuthError::Revoked);
}

#[tokio::test]
async fn test_admin_operations_require_admin() {
    let h = harness();
    let member = h.signup("plain").await;
    let other = h.signup("other").await;

    assert_eq!(
        h.gateway
            .set_account_active(&member, other.id, false)
            .await
            .unwrap_err(),
        AuthError::InsufficientRole
    );
    assert_eq!(
        h.gateway
            .set_global_role(&member, member.id, GlobalRole::Admin)
            .await
            .unwrap_err(),
        AuthError::InsufficientRole
    );
}

#[tokio::test]
async fn test_admin_operation_on_unknown_account_is_not_found() {
    let h = harness();
    let admin = h.signup_admin("lonely-admin").await;
    assert_eq!(
        h.gateway
            .set_account_active(&admin, Uuid::new_v4(), false)
            .await
            .unwrap_err(),
        AuthError::NotFound
    );
}

#[tokio::test]
async fn test_authenticate_rejects_unknown_account() {
    let h = harness();
    let account = h.signup("vanishing").await;
    let mut stranger = account.clone();
    stranger.id = Uuid::new_v4();
    let token = h.gateway.tokens().issue_access_token(&stranger).unwrap();

    assert_eq!(
        h.gateway.authenticate(&token).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
}
