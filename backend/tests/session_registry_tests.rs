mod common;

use chrono::Duration;
use common::{PASSWORD, harness};
use community_portal::{
    AuthError,
    models::{RefreshSession, SessionState},
    repository::Repository,
    tokens::RefreshToken,
};
use uuid::Uuid;

fn session_id(token: &RefreshToken) -> Uuid {
    let (id, _) = token.expose().split_once('.').unwrap();
    Uuid::parse_str(id).unwrap()
}

#[tokio::test]
async fn test_replayed_refresh_token_revokes_the_whole_lineage() {
    let h = harness();
    h.signup("replay").await;

    let first = h.gateway.login("replay", PASSWORD).await.unwrap();
    let r1 = first.refresh_token;

    let second = h.gateway.refresh(&r1).await.unwrap();
    let r2 = second.refresh_token;
    assert_ne!(r1, r2);

    // R1 was consumed by the rotation above.
    assert_eq!(h.gateway.refresh(&r1).await.unwrap_err(), AuthError::Reused);
    // The legitimate holder of R2 is cut off too.
    assert_eq!(h.gateway.refresh(&r2).await.unwrap_err(), AuthError::Revoked);

    let r1_session = h.gateway.sessions().get(session_id(&r1)).await.unwrap().unwrap();
    let r2_session = h.gateway.sessions().get(session_id(&r2)).await.unwrap().unwrap();
    assert_eq!(r1_session.state, SessionState::Rotated);
    assert_eq!(r1_session.replaced_by, Some(r2_session.id));
    assert_eq!(r2_session.state, SessionState::Revoked);
    assert_eq!(r2_session.parent_id, Some(r1_session.id));
    assert_eq!(r2_session.family_id, r1_session.family_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_exactly_one_winner() {
    let h = harness();
    let account = h.signup("racer").await;
    let pair = h.gateway.login("racer", PASSWORD).await.unwrap();

    let (a, b) = {
        let (ga, gb) = (h.gateway.clone(), h.gateway.clone());
        let (ta, tb) = (pair.refresh_token.clone(), pair.refresh_token.clone());
        tokio::join!(
            tokio::spawn(async move { ga.refresh(&ta).await }),
            tokio::spawn(async move { gb.refresh(&tb).await }),
        )
    };
    let results = [a.unwrap(), b.unwrap()];

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(winners.len(), 1, "exactly one rotation may succeed");
    assert_eq!(losers, vec![&AuthError::Reused]);

    // The loser's reuse signal killed the winner's new token as well.
    assert_eq!(
        h.gateway
            .refresh(&winners[0].refresh_token)
            .await
            .unwrap_err(),
        AuthError::Revoked
    );
    assert!(h.gateway.sessions().active_sessions(account.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rotation_of_non_active_parent_is_rejected() {
    let h = harness();
    let account = h.signup("parent").await;
    let root = h
        .gateway
        .tokens()
        .issue_refresh_token(&account)
        .await
        .unwrap();
    let root = h.gateway.sessions().get(session_id(&root)).await.unwrap().unwrap();

    let child = |hash: &str| RefreshSession {
        id: Uuid::new_v4(),
        parent_id: Some(root.id),
        token_hash: hash.to_string(),
        state: SessionState::Active,
        replaced_by: None,
        ..root.clone()
    };

    let sessions = h.gateway.sessions();
    sessions.record(child("first")).await.unwrap();
    assert_eq!(
        sessions.record(child("second")).await.unwrap_err(),
        AuthError::Reused
    );
    assert!(sessions.active_sessions(account.id).await.unwrap().is_empty());

    // A revoked parent reports Revoked, not Reused.
    let other = h
        .gateway
        .tokens()
        .issue_refresh_token(&account)
        .await
        .unwrap();
    let other = h.gateway.sessions().get(session_id(&other)).await.unwrap().unwrap();
    sessions.revoke(other.id).await.unwrap();
    let orphan = RefreshSession {
        id: Uuid::new_v4(),
        parent_id: Some(other.id),
        ..other.clone()
    };
    assert_eq!(sessions.record(orphan).await.unwrap_err(), AuthError::Revoked);
}

#[tokio::test]
async fn test_each_lineage_has_at_most_one_active_leaf() {
    let h = harness();
    let account = h.signup("chain").await;
    let mut token = h.gateway.login("chain", PASSWORD).await.unwrap().refresh_token;
    let root = session_id(&token);

    for _ in 0..5 {
        h.clock.advance(Duration::minutes(10));
        token = h.gateway.refresh(&token).await.unwrap().refresh_token;
    }

    let active = h.gateway.sessions().active_sessions(account.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, session_id(&token));
    assert_eq!(active[0].family_id, root);
}

#[tokio::test]
async fn test_lineages_are_independent() {
    let h = harness();
    let account = h.signup("two-devices").await;
    let laptop = h.gateway.login("two-devices", PASSWORD).await.unwrap().refresh_token;
    let phone = h.gateway.login("two-devices", PASSWORD).await.unwrap().refresh_token;

    h.gateway.refresh(&laptop).await.unwrap();
    assert_eq!(h.gateway.refresh(&laptop).await.unwrap_err(), AuthError::Reused);

    // The phone's login is a separate lineage and survives.
    h.gateway.refresh(&phone).await.unwrap();
    assert_eq!(
        h.gateway.sessions().active_sessions(account.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_logout_revokes_and_is_silent_for_bad_tokens() {
    let h = harness();
    h.signup("leaver").await;
    let r1 = h.gateway.login("leaver", PASSWORD).await.unwrap().refresh_token;
    let r2 = h.gateway.refresh(&r1).await.unwrap().refresh_token;

    h.gateway.logout(&r2).await.unwrap();
    assert_eq!(h.gateway.refresh(&r2).await.unwrap_err(), AuthError::Revoked);

    // Repeated and nonsensical logouts succeed without effect.
    h.gateway.logout(&r2).await.unwrap();
    h.gateway
        .logout(&RefreshToken::from_wire("garbage"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let h = harness();
    let account = h.signup("sleeper").await;
    let token = h.gateway.login("sleeper", PASSWORD).await.unwrap().refresh_token;
    let id = session_id(&token);
    assert!(h.gateway.sessions().is_active(id).await.unwrap());
    assert_eq!(h.gateway.sessions().active_sessions(account.id).await.unwrap().len(), 1);

    h.clock
        .advance(Duration::seconds(h.config.refresh_token_ttl_secs + 1));

    // Listing and point lookups agree once the session has expired.
    assert!(!h.gateway.sessions().is_active(id).await.unwrap());
    assert!(h.gateway.sessions().active_sessions(account.id).await.unwrap().is_empty());
    assert_eq!(h.gateway.refresh(&token).await.unwrap_err(), AuthError::Expired);
}

#[tokio::test]
async fn test_logout_everywhere_only_touches_own_sessions() {
    let h = harness();
    let alice = h.signup("alice").await;
    h.signup("bob").await;

    let a1 = h.gateway.login("alice", PASSWORD).await.unwrap().refresh_token;
    let a2 = h.gateway.login("alice", PASSWORD).await.unwrap().refresh_token;
    let b1 = h.gateway.login("bob", PASSWORD).await.unwrap().refresh_token;

    assert_eq!(h.gateway.logout_everywhere(alice.id).await.unwrap(), 2);

    assert_eq!(h.gateway.refresh(&a1).await.unwrap_err(), AuthError::Revoked);
    assert_eq!(h.gateway.refresh(&a2).await.unwrap_err(), AuthError::Revoked);
    assert!(h.gateway.refresh(&b1).await.is_ok());
}

#[tokio::test]
async fn test_password_change_revokes_all_sessions() {
    let h = harness();
    let account = h.signup("rotator").await;
    let token = h.gateway.login("rotator", PASSWORD).await.unwrap().refresh_token;

    h.gateway
        .change_password(account.id, PASSWORD, "fresh-password-77")
        .await
        .unwrap();

    assert_eq!(h.gateway.refresh(&token).await.unwrap_err(), AuthError::Revoked);
    assert!(h.gateway.login("rotator", "fresh-password-77").await.is_ok());
}

#[tokio::test]
async fn test_refresh_for_disabled_account_revokes_sessions() {
    let h = harness();
    let account = h.signup("suspended").await;
    let token = h.gateway.login("suspended", PASSWORD).await.unwrap().refresh_token;

    // Disabled directly in storage, bypassing the admin flow's own revocation.
    h.repo.set_account_active(account.id, false).await.unwrap();

    assert_eq!(
        h.gateway.refresh(&token).await.unwrap_err(),
        AuthError::AccountDisabled
    );
    assert!(h.gateway.sessions().active_sessions(account.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_reuse_fires_for_dead_sessions_only() {
    let h = harness();
    let account = h.signup("detector").await;
    let r1 = h.gateway.login("detector", PASSWORD).await.unwrap().refresh_token;
    let sessions = h.gateway.sessions();

    assert!(!sessions.detect_reuse(Uuid::new_v4()).await.unwrap());
    assert!(!sessions.detect_reuse(session_id(&r1)).await.unwrap());

    let r2 = h.gateway.refresh(&r1).await.unwrap().refresh_token;
    assert!(sessions.is_active(session_id(&r2)).await.unwrap());

    assert!(sessions.detect_reuse(session_id(&r1)).await.unwrap());
    assert!(!sessions.is_active(session_id(&r2)).await.unwrap());

    // A single explicitly revoked session takes its lineage down with it.
    let r3 = h.gateway.login("detector", PASSWORD).await.unwrap().refresh_token;
    let r4 = h.gateway.refresh(&r3).await.unwrap().refresh_token;
    let r5 = h.gateway.login("detector", PASSWORD).await.unwrap().refresh_token;
    assert!(sessions.revoke(session_id(&r4)).await.unwrap());
    assert!(sessions.detect_reuse(session_id(&r4)).await.unwrap());
    assert_eq!(h.gateway.refresh(&r4).await.unwrap_err(), AuthError::Revoked);

    // Other lineages are untouched.
    let active = sessions.active_sessions(account.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, session_id(&r5));
}
