use chrono::Duration;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, fmt, sync::Arc};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use crate::{
    clock::ClockState,
    config::JwtSettings,
    error::AuthError,
    models::{Account, GlobalRole, RefreshSession, SessionState},
    repository::RepositoryState,
    sessions::SessionRegistry,
};

const REFRESH_SECRET_BYTES: usize = 32;

/// AccessClaims
///
/// The signed claim set carried by an access token. Validity is purely
/// computational: signature under a known `kid`, then `exp` against the clock.
/// Access tokens are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account id.
    pub sub: Uuid,
    pub role: GlobalRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// RefreshToken
///
/// Opaque refresh credential, `<session-id>.<hex secret>`. Only the SHA-256
/// of the secret is persisted. `Debug` redacts the value so the token cannot
/// end up in logs by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    fn compose(session_id: Uuid, secret: &str) -> Self {
        Self(format!("{session_id}.{secret}"))
    }

    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Splits into session id and secret. Anything off-format is `Malformed`.
    fn parts(&self) -> Result<(Uuid, &str), AuthError> {
        let (id, secret) = self.0.split_once('.').ok_or(AuthError::Malformed)?;
        let id = Uuid::parse_str(id).map_err(|_| AuthError::Malformed)?;
        let well_formed = secret.len() == REFRESH_SECRET_BYTES * 2
            && secret.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            return Err(AuthError::Malformed);
        }
        Ok((id, secret))
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(<redacted>)")
    }
}

/// TokenPair
///
/// What login and refresh hand back to the caller.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: RefreshToken,
    pub access_expires_in: i64,
}

/// KeyRing
///
/// The current signing key plus retired verification-only keys, indexed by `kid`.
pub struct KeyRing {
    current_kid: String,
    encoding: EncodingKey,
    decoding: HashMap<String, DecodingKey>,
}

impl KeyRing {
    pub fn from_settings(settings: &JwtSettings) -> Self {
        let decoding = std::iter::once(&settings.current)
            .chain(settings.retired.iter())
            .map(|key| {
                (
                    key.kid.clone(),
                    DecodingKey::from_secret(key.secret.as_bytes()),
                )
            })
            .collect();

        Self {
            current_kid: settings.current.kid.clone(),
            encoding: EncodingKey::from_secret(settings.current.secret.as_bytes()),
            decoding,
        }
    }
}

/// TokenService
///
/// Issues and verifies access tokens, and issues and rotates refresh tokens.
/// Refresh tokens are registered with the `SessionRegistry` before they are
/// returned, so a caller never holds a token the registry does not know.
pub struct TokenService {
    keys: KeyRing,
    repo: RepositoryState,
    sessions: Arc<SessionRegistry>,
    clock: ClockState,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        keys: KeyRing,
        repo: RepositoryState,
        sessions: Arc<SessionRegistry>,
        clock: ClockState,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            keys,
            repo,
            sessions,
            clock,
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// issue_access_token
    ///
    /// Signs `{sub, role, iat, exp, jti}` with the current key (HS256) and
    /// stamps its `kid` in the header.
    pub fn issue_access_token(&self, account: &Account) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = AccessClaims {
            sub: account.id,
            role: account.global_role,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.keys.current_kid.clone());

        encode(&header, &claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// issue_refresh_token
    ///
    /// Starts a new lineage for `account`.
    pub async fn issue_refresh_token(&self, account: &Account) -> Result<RefreshToken, AuthError> {
        let id = Uuid::new_v4();
        let (token, token_hash) = mint_refresh_secret(id);
        let issued_at = self.clock.now();

        self.sessions
            .record(RefreshSession {
                id,
                account_id: account.id,
                family_id: id,
                parent_id: None,
                token_hash,
                issued_at,
                expires_at: issued_at + self.refresh_ttl,
                state: SessionState::Active,
                replaced_by: None,
            })
            .await?;

        Ok(token)
    }

    /// verify_access
    ///
    /// Signature first, then expiry, so a validly signed but stale token is
    /// always `Expired` and never `SignatureInvalid`.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        let kid = header.kid.ok_or(AuthError::Malformed)?;
        let key = self
            .keys
            .decoding
            .get(&kid)
            .ok_or(AuthError::SignatureInvalid)?;

        // Expiry is checked below against the injected clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let data = decode::<AccessClaims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Malformed,
        })?;

        if data.claims.exp < self.clock.now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(data.claims)
    }

    /// resolve_refresh
    ///
    /// Looks up the session behind a refresh token and checks its secret.
    /// Unknown ids and wrong secrets are both `Malformed`; neither triggers
    /// any lineage action, so knowing a session id alone is harmless.
    pub async fn resolve_refresh(&self, token: &RefreshToken) -> Result<RefreshSession, AuthError> {
        let (id, secret) = token.parts()?;
        let session = self.sessions.get(id).await?.ok_or(AuthError::Malformed)?;
        let digest = hash_secret(secret);
        if !bool::from(digest.as_bytes().ct_eq(session.token_hash.as_bytes())) {
            return Err(AuthError::Malformed);
        }
        Ok(session)
    }

    /// rotate_refresh
    ///
    /// Rotation-on-use: the presented token is consumed and a fresh pair is
    /// issued in the same lineage. Presenting a dead token revokes the
    /// lineage; a rotated one reports `Reused`, a revoked one `Revoked`.
    pub async fn rotate_refresh(&self, token: &RefreshToken) -> Result<TokenPair, AuthError> {
        let session = self.resolve_refresh(token).await?;

        if self.sessions.detect_reuse(session.id).await? {
            return Err(match session.state {
                SessionState::Revoked => AuthError::Revoked,
                _ => AuthError::Reused,
            });
        }

        let now = self.clock.now();
        if session.expires_at < now {
            return Err(AuthError::Expired);
        }

        let account = self
            .repo
            .get_account(session.account_id)
            .await?
            .ok_or(AuthError::Revoked)?;
        if !account.active {
            self.sessions.revoke_all(account.id).await?;
            return Err(AuthError::AccountDisabled);
        }

        // Signing is pure; nothing is observable until the registry commits.
        let access_token = self.issue_access_token(&account)?;

        let child_id = Uuid::new_v4();
        let (refresh_token, token_hash) = mint_refresh_secret(child_id);
        self.sessions
            .record(RefreshSession {
                id: child_id,
                account_id: account.id,
                family_id: session.family_id,
                parent_id: Some(session.id),
                token_hash,
                issued_at: now,
                expires_at: now + self.refresh_ttl,
                state: SessionState::Active,
                replaced_by: None,
            })
            .await?;

        debug!(account_id = %account.id, family_id = %session.family_id, "token pair rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_in: self.access_ttl_secs(),
        })
    }
}

fn mint_refresh_secret(session_id: Uuid) -> (RefreshToken, String) {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);
    let hash = hash_secret(&secret);
    (RefreshToken::compose(session_id, &secret), hash)
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
