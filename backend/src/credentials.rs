use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clock::ClockState,
    config::HashingParams,
    error::{AuthError, RepositoryError},
    models::{Account, GlobalRole},
    repository::{AccountRecord, RepositoryState},
};

const MAX_IDENTITY_LEN: usize = 254;
// Bounds the cost of hashing attacker-supplied input.
const MAX_PASSWORD_LEN: usize = 1024;
const DUMMY_PASSWORD: &str = "credential-store-timing-equalizer";

/// CredentialStore
///
/// Owns password hashes. Hashing is Argon2id with a fresh random salt per
/// password, stored as a PHC string. Verification runs on the blocking pool so
/// the slow hash never stalls the async executor, and callers must not hold
/// any lock across `verify`.
///
/// Unknown identities are verified against a dummy hash built with the same
/// parameters, so both failure paths cost one full Argon2 evaluation and
/// return the same `InvalidCredentials`.
pub struct CredentialStore {
    repo: RepositoryState,
    clock: ClockState,
    hasher: Argon2<'static>,
    min_password_len: usize,
    dummy_hash: String,
}

impl CredentialStore {
    pub fn new(
        repo: RepositoryState,
        clock: ClockState,
        params: HashingParams,
        min_password_len: usize,
    ) -> Result<Self, AuthError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_blocking(&hasher, DUMMY_PASSWORD)?;

        Ok(Self {
            repo,
            clock,
            hasher,
            min_password_len,
            dummy_hash,
        })
    }

    /// register
    ///
    /// Creates a new account with the `member` global role.
    pub async fn register(&self, identity: &str, raw_password: &str) -> Result<Account, AuthError> {
        let identity = normalize_identity(identity)?;
        self.check_strength(&identity, raw_password)?;

        let password_hash = self.hash(raw_password).await?;
        let account = Account {
            id: Uuid::new_v4(),
            identity,
            global_role: GlobalRole::Member,
            created_at: self.clock.now(),
            active: true,
        };

        let record = AccountRecord {
            account: account.clone(),
            password_hash,
        };
        match self.repo.insert_account(record).await {
            Ok(()) => {
                info!(account_id = %account.id, "account registered");
                Ok(account)
            }
            Err(RepositoryError::Duplicate) => Err(AuthError::DuplicateIdentity),
            Err(e) => Err(e.into()),
        }
    }

    /// verify
    ///
    /// Returns the account when `raw_password` matches. Disabled accounts are
    /// still returned; the gateway decides what a disabled account may do.
    pub async fn verify(&self, identity: &str, raw_password: &str) -> Result<Account, AuthError> {
        let record = match normalize_identity(identity) {
            Ok(identity) => self.repo.find_account_by_identity(&identity).await?,
            Err(_) => None,
        };

        let (account, hash) = match record {
            Some(record) => (Some(record.account), record.password_hash),
            None => (None, self.dummy_hash.clone()),
        };

        let matches = self.check(raw_password, hash).await?;
        match account {
            Some(account) if matches => Ok(account),
            _ => {
                debug!("credential verification failed");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// change_password
    ///
    /// Re-hashes after checking the current password. Revoking the account's
    /// sessions afterwards is the gateway's job.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let record = self
            .repo
            .get_account_record(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.check(current_password, record.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }
        self.check_strength(&record.account.identity, new_password)?;

        let password_hash = self.hash(new_password).await?;
        if !self.repo.update_password_hash(account_id, password_hash).await? {
            return Err(AuthError::NotFound);
        }
        info!(account_id = %account_id, "password changed");
        Ok(())
    }

    fn check_strength(&self, identity: &str, password: &str) -> Result<(), AuthError> {
        let length = password.chars().count();
        if length < self.min_password_len {
            return Err(AuthError::WeakPassword(format!(
                "must be at least {} characters",
                self.min_password_len
            )));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "must be at most {MAX_PASSWORD_LEN} bytes"
            )));
        }
        if !password.chars().any(char::is_alphabetic) || !password.chars().any(|c| c.is_ascii_digit())
        {
            return Err(AuthError::WeakPassword(
                "must contain at least one letter and one digit".to_string(),
            ));
        }
        if password.to_lowercase() == identity {
            return Err(AuthError::WeakPassword(
                "must differ from the identity".to_string(),
            ));
        }
        Ok(())
    }

    async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_blocking(&hasher, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    async fn check(&self, password: &str, hash: String) -> Result<bool, AuthError> {
        if password.len() > MAX_PASSWORD_LEN {
            return Ok(false);
        }
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| AuthError::Internal(format!("stored hash unreadable: {e}")))?;
            match hasher.verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(e) => Err(AuthError::Internal(format!("password verification failed: {e}"))),
            }
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?
    }
}

fn hash_blocking(hasher: &Argon2<'static>, password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    hasher
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

/// normalize_identity
///
/// Trims and lower-cases a handle or email. Rejects empty, overlong, or
/// whitespace/control-containing identities.
pub fn normalize_identity(raw: &str) -> Result<String, AuthError> {
    let identity = raw.trim().to_lowercase();
    if identity.is_empty()
        || identity.len() > MAX_IDENTITY_LEN
        || identity.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(AuthError::InvalidIdentity);
    }
    Ok(identity)
}
