mod common;

use chrono::Duration;
use common::{Harness, harness};
use community_portal::{
    AuthError,
    config::{JwtSettings, SigningKey},
    models::GlobalRole,
    sessions::SessionRegistry,
    tokens::{AccessClaims, KeyRing, RefreshToken, TokenService},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use std::sync::Arc;
use uuid::Uuid;

const OLD_SECRET: &str = "retired-signing-secret-for-rotation-tests";
const NEW_SECRET: &str = "current-signing-secret-for-rotation-tests";

fn signing_key(kid: &str, secret: &str) -> SigningKey {
    SigningKey {
        kid: kid.to_string(),
        secret: secret.to_string(),
    }
}

/// A token service sharing the harness store and clock but with its own keys.
fn service_with_keys(h: &Harness, current: SigningKey, retired: Vec<SigningKey>) -> TokenService {
    let settings = JwtSettings { current, retired };
    let clock = Arc::new(h.clock.clone());
    TokenService::new(
        KeyRing::from_settings(&settings),
        h.repo.clone(),
        Arc::new(SessionRegistry::new(h.repo.clone(), clock.clone())),
        clock,
        h.config.access_token_ttl_secs,
        h.config.refresh_token_ttl_secs,
    )
}

#[tokio::test]
async fn test_access_token_round_trips_claims() {
    let h = harness();
    let account = h.signup("claims").await;
    let tokens = h.gateway.tokens();

    let token = tokens.issue_access_token(&account).unwrap();
    let claims = tokens.verify_access(&token).unwrap();

    assert_eq!(claims.sub, account.id);
    assert_eq!(claims.role, GlobalRole::Member);
    assert_eq!(claims.iat, h.clock_now_ts());
    assert_eq!(claims.exp - claims.iat, h.config.access_token_ttl_secs);
}

#[tokio::test]
async fn test_access_token_expires_against_injected_clock() {
    let h = harness();
    let account = h.signup("expiry").await;
    let tokens = h.gateway.tokens();
    let token = tokens.issue_access_token(&account).unwrap();

    h.clock
        .advance(Duration::seconds(h.config.access_token_ttl_secs));
    assert!(tokens.verify_access(&token).is_ok(), "valid up to exp inclusive");

    h.clock.advance(Duration::seconds(1));
    assert_eq!(tokens.verify_access(&token), Err(AuthError::Expired));
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_signature_invalid() {
    let h = harness();
    let account = h.signup("forger").await;

    // Same kid as the real key, different secret.
    let forger = service_with_keys(&h, signing_key("test", "an-attacker-chosen-secret-value"), vec![]);
    let forged = forger.issue_access_token(&account).unwrap();

    assert_eq!(
        h.gateway.tokens().verify_access(&forged),
        Err(AuthError::SignatureInvalid)
    );
}

#[tokio::test]
async fn test_signature_is_checked_before_expiry() {
    let h = harness();
    let account = h.signup("stale-forger").await;
    let forger = service_with_keys(&h, signing_key("test", "an-attacker-chosen-secret-value"), vec![]);
    let forged = forger.issue_access_token(&account).unwrap();
    let genuine = h.gateway.tokens().issue_access_token(&account).unwrap();

    h.clock.advance(Duration::days(1));

    assert_eq!(
        h.gateway.tokens().verify_access(&forged),
        Err(AuthError::SignatureInvalid)
    );
    assert_eq!(
        h.gateway.tokens().verify_access(&genuine),
        Err(AuthError::Expired)
    );
}

#[tokio::test]
async fn test_unknown_key_id_is_signature_invalid() {
    let h = harness();
    let account = h.signup("kid").await;
    let other = service_with_keys(&h, signing_key("someone-else", NEW_SECRET), vec![]);
    let token = other.issue_access_token(&account).unwrap();

    assert_eq!(
        h.gateway.tokens().verify_access(&token),
        Err(AuthError::SignatureInvalid)
    );
}

#[tokio::test]
async fn test_tampered_payload_is_signature_invalid() {
    let h = harness();
    let victim = h.signup("victim").await;
    let attacker = h.signup("attacker").await;
    let tokens = h.gateway.tokens();

    let victim_token = tokens.issue_access_token(&victim).unwrap();
    let attacker_token = tokens.issue_access_token(&attacker).unwrap();

    // Splice the victim's payload onto the attacker's header and signature.
    let victim_parts: Vec<&str> = victim_token.split('.').collect();
    let attacker_parts: Vec<&str> = attacker_token.split('.').collect();
    let spliced = format!(
        "{}.{}.{}",
        attacker_parts[0], victim_parts[1], attacker_parts[2]
    );

    assert_eq!(tokens.verify_access(&spliced), Err(AuthError::SignatureInvalid));
}

#[tokio::test]
async fn test_garbage_and_kidless_tokens_are_malformed() {
    let h = harness();
    let tokens = h.gateway.tokens();

    assert_eq!(tokens.verify_access(""), Err(AuthError::Malformed));
    assert_eq!(tokens.verify_access("not-a-jwt"), Err(AuthError::Malformed));
    assert_eq!(tokens.verify_access("a.b.c"), Err(AuthError::Malformed));

    let claims = AccessClaims {
        sub: Uuid::new_v4(),
        role: GlobalRole::Member,
        iat: h.clock_now_ts(),
        exp: h.clock_now_ts() + 60,
        jti: Uuid::new_v4(),
    };
    let kidless = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(h.config.jwt.current.secret.as_bytes()),
    )
    .unwrap();
    assert_eq!(tokens.verify_access(&kidless), Err(AuthError::Malformed));
}

#[tokio::test]
async fn test_retired_key_still_verifies_after_rotation() {
    let h = harness();
    let account = h.signup("rotation").await;

    let before = service_with_keys(&h, signing_key("2025", OLD_SECRET), vec![]);
    let after = service_with_keys(
        &h,
        signing_key("2026", NEW_SECRET),
        vec![signing_key("2025", OLD_SECRET)],
    );

    let old_token = before.issue_access_token(&account).unwrap();
    let new_token = after.issue_access_token(&account).unwrap();

    assert_eq!(after.verify_access(&old_token).unwrap().sub, account.id);
    assert_eq!(after.verify_access(&new_token).unwrap().sub, account.id);
    // The old ring never learned the new key.
    assert_eq!(
        before.verify_access(&new_token),
        Err(AuthError::SignatureInvalid)
    );
}

#[tokio::test]
async fn test_refresh_token_format_and_redacted_debug() {
    let h = harness();
    let account = h.signup("opaque").await;
    let token = h
        .gateway
        .tokens()
        .issue_refresh_token(&account)
        .await
        .unwrap();

    let (id, secret) = token.expose().split_once('.').unwrap();
    let id = Uuid::parse_str(id).unwrap();
    assert_eq!(secret.len(), 64);
    assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));

    let session = h.gateway.sessions().get(id).await.unwrap().unwrap();
    assert_eq!(session.account_id, account.id);
    assert_eq!(session.family_id, id);
    assert!(session.parent_id.is_none());
    assert_ne!(session.token_hash, secret, "only a digest is stored");

    let debug = format!("{token:?}");
    assert!(!debug.contains(secret));
}

#[tokio::test]
async fn test_unresolvable_refresh_tokens_are_malformed() {
    let h = harness();
    let account = h.signup("resolver").await;
    let tokens = h.gateway.tokens();
    let issued = tokens.issue_refresh_token(&account).await.unwrap();
    let (id, _) = issued.expose().split_once('.').unwrap();

    let hex64 = "ab".repeat(32);
    let candidates = [
        String::new(),
        "no-separator".to_string(),
        format!("not-a-uuid.{hex64}"),
        format!("{id}.tooshort"),
        format!("{id}.{}", "zz".repeat(32)),
        // Well-formed but unknown session.
        format!("{}.{hex64}", Uuid::new_v4()),
        // Known session, wrong secret.
        format!("{id}.{hex64}"),
    ];

    for raw in candidates {
        let token = RefreshToken::from_wire(raw.clone());
        assert_eq!(
            tokens.resolve_refresh(&token).await.unwrap_err(),
            AuthError::Malformed,
            "token {raw:?}"
        );
    }

    // A wrong secret for a real id must not disturb the real session.
    assert!(h.gateway.sessions().is_active(Uuid::parse_str(id).unwrap()).await.unwrap());
}

#[tokio::test]
async fn test_refresh_secret_must_match_exactly() {
    let h = harness();
    let account = h.signup("near-miss").await;
    let tokens = h.gateway.tokens();
    let issued = tokens.issue_refresh_token(&account).await.unwrap();
    let (id, secret) = issued.expose().split_once('.').unwrap();

    let resolved = tokens.resolve_refresh(&issued).await.unwrap();
    assert_eq!(resolved.id.to_string(), id);

    let last = secret.chars().last().unwrap();
    let flipped = if last == '0' { '1' } else { '0' };
    let candidates = [
        format!("{id}.{}{flipped}", &secret[..secret.len() - 1]),
        format!("{id}.{}", secret.to_uppercase()),
    ];
    for raw in candidates {
        assert_eq!(
            tokens
                .resolve_refresh(&RefreshToken::from_wire(raw.clone()))
                .await
                .unwrap_err(),
            AuthError::Malformed,
            "token {raw:?}"
        );
    }
}
