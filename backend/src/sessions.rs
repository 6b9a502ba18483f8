use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::ClockState,
    error::AuthError,
    models::{RefreshSession, SessionState},
    repository::RepositoryState,
};

/// SessionRegistry
///
/// Tracks refresh-token lineage per account. All state lives in the
/// repository; the registry holds no in-process session state, so any number
/// of server instances can share it.
///
/// Per session: `active -> rotated` (refresh) or `active -> revoked`
/// (logout, ban, lineage revocation). Both end states are terminal, and each
/// lineage has at most one `active` leaf.
pub struct SessionRegistry {
    repo: RepositoryState,
    clock: ClockState,
}

impl SessionRegistry {
    pub fn new(repo: RepositoryState, clock: ClockState) -> Self {
        Self { repo, clock }
    }

    /// record
    ///
    /// Stores a new session. A session without `parent_id` starts a lineage.
    /// With a parent, this is a rotation: the parent must still be `active`,
    /// and flipping it to `rotated` plus storing the child happens as one
    /// conditional update. Exactly one concurrent rotation of a given parent
    /// wins; the losers get `Reused` and the whole lineage is revoked.
    pub async fn record(&self, session: RefreshSession) -> Result<RefreshSession, AuthError> {
        let Some(parent_id) = session.parent_id else {
            self.repo.insert_session(session.clone()).await?;
            info!(
                account_id = %session.account_id,
                session_id = %session.id,
                "refresh lineage started"
            );
            return Ok(session);
        };

        if self.repo.rotate_session(parent_id, session.clone()).await? {
            debug!(
                session_id = %session.id,
                parent_id = %parent_id,
                family_id = %session.family_id,
                "refresh session rotated"
            );
            return Ok(session);
        }

        // The parent left `active` underneath us.
        match self.repo.get_session(parent_id).await? {
            Some(parent) if parent.state == SessionState::Revoked => Err(AuthError::Revoked),
            _ => {
                warn!(
                    account_id = %session.account_id,
                    family_id = %session.family_id,
                    "concurrent rotation lost; revoking lineage"
                );
                self.revoke_lineage(session.family_id).await?;
                Err(AuthError::Reused)
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RefreshSession>, AuthError> {
        Ok(self.repo.get_session(id).await?)
    }

    /// revoke
    ///
    /// `active -> revoked` for a single session. Returns false when the
    /// session was unknown or already terminal.
    pub async fn revoke(&self, id: Uuid) -> Result<bool, AuthError> {
        let revoked = self.repo.revoke_session(id).await?;
        if revoked {
            info!(session_id = %id, "refresh session revoked");
        }
        Ok(revoked)
    }

    pub async fn revoke_lineage(&self, family_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self.repo.revoke_family(family_id).await?;
        info!(family_id = %family_id, revoked, "refresh lineage revoked");
        Ok(revoked)
    }

    /// revoke_all
    ///
    /// Logout-everywhere. Also triggered by password change and account
    /// deactivation.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self.repo.revoke_account_sessions(account_id).await?;
        info!(account_id = %account_id, revoked, "all refresh sessions revoked");
        Ok(revoked)
    }

    /// is_active
    ///
    /// True only for a known, `active`, unexpired session.
    pub async fn is_active(&self, id: Uuid) -> Result<bool, AuthError> {
        let now = self.clock.now();
        Ok(self
            .repo
            .get_session(id)
            .await?
            .is_some_and(|s| s.is_active() && s.expires_at >= now))
    }

    /// detect_reuse
    ///
    /// True if `id` is no longer active: it was rotated away or revoked. The
    /// entire lineage rooted at the original login is revoked before
    /// returning. A rotated token being presented again means someone is
    /// replaying a consumed token and is logged as a security event.
    pub async fn detect_reuse(&self, id: Uuid) -> Result<bool, AuthError> {
        let Some(session) = self.repo.get_session(id).await? else {
            return Ok(false);
        };
        match session.state {
            SessionState::Active => return Ok(false),
            SessionState::Rotated => warn!(
                account_id = %session.account_id,
                session_id = %session.id,
                family_id = %session.family_id,
                "rotated refresh token presented again; possible token theft"
            ),
            SessionState::Revoked => debug!(
                session_id = %session.id,
                "revoked refresh token presented"
            ),
        }
        self.revoke_lineage(session.family_id).await?;
        Ok(true)
    }

    pub async fn active_sessions(&self, account_id: Uuid) -> Result<Vec<RefreshSession>, AuthError> {
        Ok(self
            .repo
            .list_active_sessions(account_id, self.clock.now())
            .await?)
    }
}
