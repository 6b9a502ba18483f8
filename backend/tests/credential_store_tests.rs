mod common;

use common::{PASSWORD, harness};
use community_portal::{
    AuthError, credentials::normalize_identity, models::GlobalRole, repository::Repository,
};

#[tokio::test]
async fn test_register_then_verify_returns_same_account() {
    let h = harness();
    let account = h.gateway.signup("ada@example.com", PASSWORD).await.unwrap();

    assert_eq!(account.global_role, GlobalRole::Member);
    assert!(account.active);

    let verified = h
        .gateway
        .credentials()
        .verify("ada@example.com", PASSWORD)
        .await
        .unwrap();
    assert_eq!(verified.id, account.id);
}

#[tokio::test]
async fn test_identity_is_normalized_before_storage_and_lookup() {
    let h = harness();
    let account = h.signup("  Ada@Example.COM ").await;
    assert_eq!(account.identity, "ada@example.com");

    let verified = h
        .gateway
        .credentials()
        .verify("ADA@example.com", PASSWORD)
        .await
        .unwrap();
    assert_eq!(verified.id, account.id);
}

#[tokio::test]
async fn test_duplicate_identity_rejected_case_insensitively() {
    let h = harness();
    h.signup("grace").await;

    let err = h.gateway.signup("GRACE", "another-pass-9").await.unwrap_err();
    assert_eq!(err, AuthError::DuplicateIdentity);
}

#[tokio::test]
async fn test_unknown_identity_and_wrong_password_are_indistinguishable() {
    let h = harness();
    h.signup("linus").await;

    let wrong_password = h
        .gateway
        .credentials()
        .verify("linus", "not-the-password-1")
        .await
        .unwrap_err();
    let unknown_identity = h
        .gateway
        .credentials()
        .verify("nobody", PASSWORD)
        .await
        .unwrap_err();

    assert_eq!(wrong_password, AuthError::InvalidCredentials);
    assert_eq!(wrong_password, unknown_identity);
    assert_eq!(wrong_password.to_string(), unknown_identity.to_string());
}

#[tokio::test]
async fn test_unacceptable_identity_fails_verification_as_invalid_credentials() {
    let h = harness();
    let err = h
        .gateway
        .credentials()
        .verify("   ", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_weak_passwords_rejected() {
    let h = harness();

    for weak in ["short1", "onlyletters", "1234567890", "margaret"] {
        let err = h.gateway.signup("margaret", weak).await.unwrap_err();
        assert!(
            matches!(err, AuthError::WeakPassword(_)),
            "expected WeakPassword for {weak:?}, got {err:?}"
        );
    }

    let too_long = format!("a1{}", "x".repeat(1100));
    let err = h.gateway.signup("margaret", &too_long).await.unwrap_err();
    assert!(matches!(err, AuthError::WeakPassword(_)));

    // Nothing was stored by the failed attempts.
    assert!(h.repo.find_account_by_identity("margaret").await.unwrap().is_none());
}

#[tokio::test]
async fn test_password_equal_to_identity_rejected() {
    let h = harness();
    let err = h.gateway.signup("Hopper2024", "hopper2024").await.unwrap_err();
    assert!(matches!(err, AuthError::WeakPassword(_)));
}

#[tokio::test]
async fn test_invalid_identities_rejected_on_signup() {
    let h = harness();
    let overlong = "a".repeat(255);
    for bad in ["", "   ", "two words", "tab\there", overlong.as_str()] {
        let err = h.gateway.signup(bad, PASSWORD).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidIdentity, "identity {bad:?}");
    }
}

#[test]
fn test_normalize_identity() {
    assert_eq!(normalize_identity(" Bob@Mail.org ").unwrap(), "bob@mail.org");
    assert_eq!(normalize_identity("x").unwrap(), "x");
    assert_eq!(normalize_identity("\n"), Err(AuthError::InvalidIdentity));
    assert_eq!(normalize_identity("a\u{0}b"), Err(AuthError::InvalidIdentity));
}

#[tokio::test]
async fn test_password_hash_is_salted_phc_string() {
    let h = harness();
    let first = h.signup("first").await;
    let second = h.signup("second").await;

    let first = h.repo.get_account_record(first.id).await.unwrap().unwrap();
    let second = h.repo.get_account_record(second.id).await.unwrap().unwrap();

    assert!(first.password_hash.starts_with("$argon2id$"));
    assert_ne!(first.password_hash, second.password_hash);
    assert!(!first.password_hash.contains(PASSWORD));
}

#[tokio::test]
async fn test_account_serialization_and_debug_never_expose_the_hash() {
    let h = harness();
    let account = h.signup("quiet").await;
    let record = h.repo.get_account_record(account.id).await.unwrap().unwrap();

    let json = serde_json::to_string(&account).unwrap();
    assert!(!json.contains("argon2"));
    assert!(!json.to_lowercase().contains("password"));

    let debug = format!("{record:?}");
    assert!(!debug.contains(&record.password_hash));
}

#[tokio::test]
async fn test_change_password_replaces_old_password() {
    let h = harness();
    let account = h.signup("changer").await;
    let credentials = h.gateway.credentials();

    let err = credentials
        .change_password(account.id, "wrong-current-1", "brand-new-pass-2")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    let err = credentials
        .change_password(account.id, PASSWORD, "weak")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::WeakPassword(_)));

    credentials
        .change_password(account.id, PASSWORD, "brand-new-pass-2")
        .await
        .unwrap();

    assert_eq!(
        credentials.verify("changer", PASSWORD).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    assert_eq!(
        credentials
            .verify("changer", "brand-new-pass-2")
            .await
            .unwrap()
            .id,
        account.id
    );
}

#[tokio::test]
async fn test_disabled_account_still_verifies_but_cannot_log_in() {
    let h = harness();
    let account = h.signup("dormant").await;
    h.repo.set_account_active(account.id, false).await.unwrap();

    let verified = h
        .gateway
        .credentials()
        .verify("dormant", PASSWORD)
        .await
        .unwrap();
    assert!(!verified.active);

    let err = h.gateway.login("dormant", PASSWORD).await.unwrap_err();
    assert_eq!(err, AuthError::AccountDisabled);
}
