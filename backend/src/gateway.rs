use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    authz::{Action, AuthorizationEngine, Decision, Resource, outranks},
    clock::ClockState,
    config::AppConfig,
    credentials::CredentialStore,
    error::AuthError,
    models::{Account, GlobalRole, Role},
    repository::RepositoryState,
    sessions::SessionRegistry,
    tokens::{AccessClaims, KeyRing, RefreshToken, TokenPair, TokenService},
};

/// AuthGateway
///
/// The façade request handlers talk to. It sequences the credential store,
/// token service, session registry and authorization engine so that each
/// operation either completes or leaves no trace a caller could observe:
/// tokens are only returned after their session is committed.
pub struct AuthGateway {
    credentials: CredentialStore,
    tokens: TokenService,
    sessions: Arc<SessionRegistry>,
    authz: AuthorizationEngine,
    repo: RepositoryState,
}

/// GatewayState
///
/// Shared handle used in the application state.
pub type GatewayState = Arc<AuthGateway>;

impl AuthGateway {
    pub fn new(
        repo: RepositoryState,
        clock: ClockState,
        config: &AppConfig,
    ) -> Result<Self, AuthError> {
        let sessions = Arc::new(SessionRegistry::new(repo.clone(), clock.clone()));
        let credentials = CredentialStore::new(
            repo.clone(),
            clock.clone(),
            config.hashing,
            config.password_min_length,
        )?;
        let tokens = TokenService::new(
            KeyRing::from_settings(&config.jwt),
            repo.clone(),
            sessions.clone(),
            clock,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        );

        Ok(Self {
            credentials,
            tokens,
            sessions,
            authz: AuthorizationEngine::new(repo.clone()),
            repo,
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn authz(&self) -> &AuthorizationEngine {
        &self.authz
    }

    pub async fn signup(&self, identity: &str, password: &str) -> Result<Account, AuthError> {
        self.credentials.register(identity, password).await
    }

    /// login
    ///
    /// Verifies credentials, then mints an access token and starts a new
    /// refresh lineage.
    pub async fn login(&self, identity: &str, password: &str) -> Result<TokenPair, AuthError> {
        let account = self.credentials.verify(identity, password).await?;
        if !account.active {
            return Err(AuthError::AccountDisabled);
        }

        let access_token = self.tokens.issue_access_token(&account)?;
        let refresh_token = self.tokens.issue_refresh_token(&account).await?;
        info!(account_id = %account.id, "login succeeded");

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_in: self.tokens.access_ttl_secs(),
        })
    }

    pub async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, AuthError> {
        self.tokens.rotate_refresh(refresh_token).await
    }

    /// logout
    ///
    /// Ends the login the token belongs to by revoking its lineage. Unknown,
    /// malformed or already dead tokens are accepted silently so the endpoint
    /// reveals nothing; storage failures still propagate.
    pub async fn logout(&self, refresh_token: &RefreshToken) -> Result<(), AuthError> {
        let session = match self.tokens.resolve_refresh(refresh_token).await {
            Ok(session) => session,
            Err(AuthError::Storage(msg)) => return Err(AuthError::Storage(msg)),
            Err(_) => return Ok(()),
        };

        if self.sessions.detect_reuse(session.id).await? {
            // Already dead; detect_reuse revoked the lineage.
            return Ok(());
        }
        self.sessions.revoke_lineage(session.family_id).await?;
        info!(account_id = %session.account_id, "logout");
        Ok(())
    }

    pub async fn logout_everywhere(&self, account_id: Uuid) -> Result<u64, AuthError> {
        self.sessions.revoke_all(account_id).await
    }

    /// change_password
    ///
    /// A new password invalidates every outstanding refresh token.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.credentials
            .change_password(account_id, current_password, new_password)
            .await?;
        self.sessions.revoke_all(account_id).await?;
        Ok(())
    }

    /// authenticate
    ///
    /// Resolves a bearer access token to the current account record. The role
    /// comes from storage, not the token, so demotions apply immediately.
    pub async fn authenticate(&self, access_token: &str) -> Result<Account, AuthError> {
        let AccessClaims { sub, .. } = self.tokens.verify_access(access_token)?;
        let account = self
            .repo
            .get_account(sub)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !account.active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(account)
    }

    /// require_permission
    ///
    /// The guard every protected route runs before its body.
    pub async fn require_permission(
        &self,
        account: &Account,
        action: Action,
        resource: Resource,
    ) -> Result<(), AuthError> {
        let decision = self.authz.can_perform(account, action, resource).await?;
        if let Decision::Deny(reason) = decision {
            info!(account_id = %account.id, %action, ?resource, ?reason, "permission denied");
        }
        decision.into_result()
    }

    /// require_outranks
    ///
    /// Guard for changing another member: non-admins may only act on members
    /// ranked strictly below themselves.
    pub async fn require_outranks(
        &self,
        actor: &Account,
        community_id: Uuid,
        target_id: Uuid,
    ) -> Result<Role, AuthError> {
        let target_role = self.authz.effective_role(target_id, community_id).await?;
        if actor.global_role == GlobalRole::Admin {
            return Ok(target_role);
        }
        let actor_role = self.authz.effective_role(actor.id, community_id).await?;
        if !outranks(actor_role, target_role) {
            return Err(AuthError::InsufficientRole);
        }
        Ok(target_role)
    }

    /// set_account_active
    ///
    /// Admin operation. Deactivation also revokes all the account's sessions.
    pub async fn set_account_active(
        &self,
        admin: &Account,
        target_id: Uuid,
        active: bool,
    ) -> Result<Account, AuthError> {
        self.require_permission(admin, Action::ManageAccounts, Resource::Platform)
            .await?;
        let account = self
            .repo
            .set_account_active(target_id, active)
            .await?
            .ok_or(AuthError::NotFound)?;
        if !active {
            self.sessions.revoke_all(target_id).await?;
            warn!(account_id = %target_id, admin_id = %admin.id, "account disabled");
        }
        Ok(account)
    }

    pub async fn set_global_role(
        &self,
        admin: &Account,
        target_id: Uuid,
        role: GlobalRole,
    ) -> Result<Account, AuthError> {
        self.require_permission(admin, Action::ManageAccounts, Resource::Platform)
            .await?;
        let account = self
            .repo
            .set_global_role(target_id, role)
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(account_id = %target_id, admin_id = %admin.id, %role, "global role changed");
        Ok(account)
    }
}
