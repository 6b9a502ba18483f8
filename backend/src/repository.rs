use crate::error::RepositoryError;
use crate::models::{
    Account, Community, GlobalRole, Membership, Post, RefreshSession, Role, SessionState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// AccountRecord
///
/// An account together with its PHC-formatted password hash (the salt is
/// embedded in the PHC string). Only the credential store reads
/// `password_hash`; everything else works with `Account`.
#[derive(Clone)]
pub struct AccountRecord {
    pub account: Account,
    pub password_hash: String,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("account", &self.account)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// Repository Trait
///
/// The persistence collaborator: key-based get/put plus the conditional
/// updates the auth core relies on. The one correctness-critical method is
/// `rotate_session`, which must flip the parent from `active` to `rotated` and
/// store the child as a single atomic step, succeeding for exactly one caller.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Accounts ---
    /// Fails with `RepositoryError::Duplicate` when the identity is taken.
    async fn insert_account(&self, record: AccountRecord) -> RepoResult<()>;
    async fn find_account_by_identity(&self, identity: &str) -> RepoResult<Option<AccountRecord>>;
    async fn get_account_record(&self, id: Uuid) -> RepoResult<Option<AccountRecord>>;
    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>>;
    async fn update_password_hash(&self, id: Uuid, password_hash: String) -> RepoResult<bool>;
    async fn set_account_active(&self, id: Uuid, active: bool) -> RepoResult<Option<Account>>;
    async fn set_global_role(&self, id: Uuid, role: GlobalRole) -> RepoResult<Option<Account>>;

    // --- Communities & Memberships ---
    /// Stores the community and its owner membership together.
    async fn insert_community(&self, community: Community, owner: Membership) -> RepoResult<()>;
    async fn get_community(&self, id: Uuid) -> RepoResult<Option<Community>>;
    async fn get_membership(
        &self,
        account_id: Uuid,
        community_id: Uuid,
    ) -> RepoResult<Option<Membership>>;
    /// Fails with `RepositoryError::Duplicate` when the pair already exists.
    async fn insert_membership(&self, membership: Membership) -> RepoResult<()>;
    async fn update_membership_role(
        &self,
        account_id: Uuid,
        community_id: Uuid,
        role: Role,
    ) -> RepoResult<Option<Membership>>;
    async fn remove_membership(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool>;
    /// Removes the membership (if any) and records the ban.
    async fn ban_member(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<()>;
    async fn is_banned(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool>;

    // --- Posts ---
    async fn insert_post(&self, post: Post) -> RepoResult<()>;
    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>>;
    async fn update_post_content(
        &self,
        id: Uuid,
        content: String,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Post>>;
    /// Returns false if the post is missing or already deleted.
    async fn soft_delete_post(&self, id: Uuid, deleted_at: DateTime<Utc>) -> RepoResult<bool>;

    // --- Refresh Sessions ---
    async fn insert_session(&self, session: RefreshSession) -> RepoResult<()>;
    async fn get_session(&self, id: Uuid) -> RepoResult<Option<RefreshSession>>;
    /// Atomically: if `parent_id` is `active`, mark it `rotated` with
    /// `replaced_by = child.id` and insert `child`; return true. Otherwise
    /// change nothing and return false.
    async fn rotate_session(&self, parent_id: Uuid, child: RefreshSession) -> RepoResult<bool>;
    /// `active -> revoked` for one session. False if it was not active.
    async fn revoke_session(&self, id: Uuid) -> RepoResult<bool>;
    /// Revokes every active session in the lineage. Returns how many changed.
    async fn revoke_family(&self, family_id: Uuid) -> RepoResult<u64>;
    async fn revoke_account_sessions(&self, account_id: Uuid) -> RepoResult<u64>;
    /// Sessions that are `active` and unexpired at `now`, newest first.
    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<RefreshSession>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Postgres Implementation ---

/// PostgresRepository
///
/// The production implementation of the `Repository` trait, over the
/// `accounts`, `communities`, `memberships`, `community_bans`, `posts` and
/// `refresh_sessions` tables described in `migrations/`. Applying them is
/// left to deployment (`sqlx migrate run`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// revoke_locked
    ///
    /// Bulk revocation keyed on `family_id` or `account_id`. The `FOR UPDATE`
    /// waits for any in-flight rotation of a matching row, so the `UPDATE`
    /// statement's snapshot includes the child that rotation inserted. A
    /// rotation starting after the lock finds its parent already revoked.
    async fn revoke_locked(&self, column: &'static str, key: Uuid) -> RepoResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "SELECT id FROM refresh_sessions WHERE {column} = $1 FOR UPDATE"
        ))
        .bind(key)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query(&format!(
            "UPDATE refresh_sessions SET state = 'revoked' WHERE {column} = $1 AND state = 'active'"
        ))
        .bind(key)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

// Roles and states are stored as text; these rows decode them strictly.

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    identity: String,
    password_hash: String,
    global_role: String,
    created_at: DateTime<Utc>,
    active: bool,
}

impl TryFrom<AccountRow> for AccountRecord {
    type Error = RepositoryError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(AccountRecord {
            account: Account {
                id: row.id,
                identity: row.identity,
                global_role: row.global_role.parse().map_err(RepositoryError::Backend)?,
                created_at: row.created_at,
                active: row.active,
            },
            password_hash: row.password_hash,
        })
    }
}

#[derive(FromRow)]
struct MembershipRow {
    account_id: Uuid,
    community_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = RepositoryError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            account_id: row.account_id,
            community_id: row.community_id,
            role: row.role.parse().map_err(RepositoryError::Backend)?,
            joined_at: row.joined_at,
        })
    }
}

#[derive(FromRow)]
struct CommunityRow {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<CommunityRow> for Community {
    fn from(row: CommunityRow) -> Self {
        Community {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct PostRow {
    id: Uuid,
    author_id: Uuid,
    community_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted: bool,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            author_id: row.author_id,
            community_id: row.community_id,
            content: row.content,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted: row.deleted,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    account_id: Uuid,
    family_id: Uuid,
    parent_id: Option<Uuid>,
    token_hash: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: String,
    replaced_by: Option<Uuid>,
}

impl TryFrom<SessionRow> for RefreshSession {
    type Error = RepositoryError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(RefreshSession {
            id: row.id,
            account_id: row.account_id,
            family_id: row.family_id,
            parent_id: row.parent_id,
            token_hash: row.token_hash,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            state: row.state.parse().map_err(RepositoryError::Backend)?,
            replaced_by: row.replaced_by,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, identity, password_hash, global_role, created_at, active";
const SESSION_COLUMNS: &str =
    "id, account_id, family_id, parent_id, token_hash, issued_at, expires_at, state, replaced_by";
const POST_COLUMNS: &str = "id, author_id, community_id, content, created_at, updated_at, deleted";

async fn insert_session_with<'e, E: PgExecutor<'e>>(
    executor: E,
    session: &RefreshSession,
) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_sessions
            (id, account_id, family_id, parent_id, token_hash, issued_at, expires_at, state, replaced_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(session.id)
    .bind(session.account_id)
    .bind(session.family_id)
    .bind(session.parent_id)
    .bind(&session.token_hash)
    .bind(session.issued_at)
    .bind(session.expires_at)
    .bind(session.state.as_str())
    .bind(session.replaced_by)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_membership_with<'e, E: PgExecutor<'e>>(
    executor: E,
    membership: &Membership,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO memberships (account_id, community_id, role, joined_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(membership.account_id)
    .bind(membership.community_id)
    .bind(membership.role.as_str())
    .bind(membership.joined_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert_account(&self, record: AccountRecord) -> RepoResult<()> {
        let account = &record.account;
        sqlx::query(
            r#"
            INSERT INTO accounts (id, identity, password_hash, global_role, created_at, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(&account.identity)
        .bind(&record.password_hash)
        .bind(account.global_role.as_str())
        .bind(account.created_at)
        .bind(account.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_account_by_identity(&self, identity: &str) -> RepoResult<Option<AccountRecord>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE identity = $1"
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRecord::try_from).transpose()
    }

    async fn get_account_record(&self, id: Uuid) -> RepoResult<Option<AccountRecord>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRecord::try_from).transpose()
    }

    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>> {
        Ok(self.get_account_record(id).await?.map(|r| r.account))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: String) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE accounts SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> RepoResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET active = $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccountRecord::try_from).transpose()?.map(|r| r.account))
    }

    async fn set_global_role(&self, id: Uuid, role: GlobalRole) -> RepoResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET global_role = $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccountRecord::try_from).transpose()?.map(|r| r.account))
    }

    async fn insert_community(&self, community: Community, owner: Membership) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO communities (id, name, owner_id, created_at) VALUES ($1, $2, $3, $4)")
            .bind(community.id)
            .bind(&community.name)
            .bind(community.owner_id)
            .bind(community.created_at)
            .execute(&mut *tx)
            .await?;
        insert_membership_with(&mut *tx, &owner).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_community(&self, id: Uuid) -> RepoResult<Option<Community>> {
        let row = sqlx::query_as::<_, CommunityRow>(
            "SELECT id, name, owner_id, created_at FROM communities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Community::from))
    }

    async fn get_membership(
        &self,
        account_id: Uuid,
        community_id: Uuid,
    ) -> RepoResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT account_id, community_id, role, joined_at
            FROM memberships
            WHERE account_id = $1 AND community_id = $2
            "#,
        )
        .bind(account_id)
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Membership::try_from).transpose()
    }

    async fn insert_membership(&self, membership: Membership) -> RepoResult<()> {
        insert_membership_with(&self.pool, &membership).await
    }

    async fn update_membership_role(
        &self,
        account_id: Uuid,
        community_id: Uuid,
        role: Role,
    ) -> RepoResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            UPDATE memberships SET role = $3
            WHERE account_id = $1 AND community_id = $2
            RETURNING account_id, community_id, role, joined_at
            "#,
        )
        .bind(account_id)
        .bind(community_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Membership::try_from).transpose()
    }

    async fn remove_membership(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool> {
        let result =
            sqlx::query("DELETE FROM memberships WHERE account_id = $1 AND community_id = $2")
                .bind(account_id)
                .bind(community_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn ban_member(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM memberships WHERE account_id = $1 AND community_id = $2")
            .bind(account_id)
            .bind(community_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO community_bans (account_id, community_id, banned_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (account_id, community_id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(community_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn is_banned(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool> {
        let banned: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM community_bans WHERE account_id = $1 AND community_id = $2
            )
            "#,
        )
        .bind(account_id)
        .bind(community_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(banned)
    }

    async fn insert_post(&self, post: Post) -> RepoResult<()> {
        sqlx::query(&format!(
            "INSERT INTO posts ({POST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(post.id)
        .bind(post.author_id)
        .bind(post.community_id)
        .bind(&post.content)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    async fn update_post_content(
        &self,
        id: Uuid,
        content: String,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts SET content = $2, updated_at = $3
            WHERE id = $1 AND deleted = false
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(content)
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    async fn soft_delete_post(&self, id: Uuid, deleted_at: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE posts SET deleted = true, updated_at = $2 WHERE id = $1 AND deleted = false",
        )
        .bind(id)
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_session(&self, session: RefreshSession) -> RepoResult<()> {
        insert_session_with(&self.pool, &session).await
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<RefreshSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM refresh_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RefreshSession::try_from).transpose()
    }

    /// rotate_session
    ///
    /// The conditional `UPDATE ... WHERE state = 'active'` takes the row lock,
    /// so a concurrent rotation of the same parent blocks, re-evaluates the
    /// predicate after we commit, and affects zero rows.
    async fn rotate_session(&self, parent_id: Uuid, child: RefreshSession) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET state = 'rotated', replaced_by = $2
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(parent_id)
        .bind(child.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_session_with(&mut *tx, &child).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_session(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET state = 'revoked' WHERE id = $1 AND state = 'active'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_family(&self, family_id: Uuid) -> RepoResult<u64> {
        self.revoke_locked("family_id", family_id).await
    }

    async fn revoke_account_sessions(&self, account_id: Uuid) -> RepoResult<u64> {
        self.revoke_locked("account_id", account_id).await
    }

    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<RefreshSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM refresh_sessions
            WHERE account_id = $1 AND state = 'active' AND expires_at >= $2
            ORDER BY issued_at DESC
            "#
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RefreshSession::try_from).collect()
    }
}

// --- In-Memory Implementation ---

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, AccountRecord>,
    identities: HashMap<String, Uuid>,
    communities: HashMap<Uuid, Community>,
    community_names: HashSet<String>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    bans: HashSet<(Uuid, Uuid)>,
    posts: HashMap<Uuid, Post>,
    sessions: HashMap<Uuid, RefreshSession>,
}

impl MemoryState {
    fn revoke_where(&mut self, predicate: impl Fn(&RefreshSession) -> bool) -> u64 {
        let mut revoked = 0;
        for session in self.sessions.values_mut() {
            if session.state == SessionState::Active && predicate(session) {
                session.state = SessionState::Revoked;
                revoked += 1;
            }
        }
        revoked
    }
}

/// InMemoryRepository
///
/// A `Repository` backed by process memory, used by the test-suite and for
/// running the server locally without Postgres. All state sits behind one
/// mutex, so every method (including `rotate_session`) is atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_account(&self, record: AccountRecord) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if state.identities.contains_key(&record.account.identity) {
            return Err(RepositoryError::Duplicate);
        }
        state
            .identities
            .insert(record.account.identity.clone(), record.account.id);
        state.accounts.insert(record.account.id, record);
        Ok(())
    }

    async fn find_account_by_identity(&self, identity: &str) -> RepoResult<Option<AccountRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .identities
            .get(identity)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn get_account_record(&self, id: Uuid) -> RepoResult<Option<AccountRecord>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn get_account(&self, id: Uuid) -> RepoResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .get(&id)
            .map(|r| r.account.clone()))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: String) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.accounts.get_mut(&id) {
            Some(record) => {
                record.password_hash = password_hash;
                true
            }
            None => false,
        })
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> RepoResult<Option<Account>> {
        let mut state = self.state.lock().await;
        Ok(state.accounts.get_mut(&id).map(|record| {
            record.account.active = active;
            record.account.clone()
        }))
    }

    async fn set_global_role(&self, id: Uuid, role: GlobalRole) -> RepoResult<Option<Account>> {
        let mut state = self.state.lock().await;
        Ok(state.accounts.get_mut(&id).map(|record| {
            record.account.global_role = role;
            record.account.clone()
        }))
    }

    async fn insert_community(&self, community: Community, owner: Membership) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if state.community_names.contains(&community.name)
            || state.communities.contains_key(&community.id)
        {
            return Err(RepositoryError::Duplicate);
        }
        state.community_names.insert(community.name.clone());
        state
            .memberships
            .insert((owner.account_id, owner.community_id), owner);
        state.communities.insert(community.id, community);
        Ok(())
    }

    async fn get_community(&self, id: Uuid) -> RepoResult<Option<Community>> {
        Ok(self.state.lock().await.communities.get(&id).cloned())
    }

    async fn get_membership(
        &self,
        account_id: Uuid,
        community_id: Uuid,
    ) -> RepoResult<Option<Membership>> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .get(&(account_id, community_id))
            .cloned())
    }

    async fn insert_membership(&self, membership: Membership) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        let key = (membership.account_id, membership.community_id);
        if state.memberships.contains_key(&key) {
            return Err(RepositoryError::Duplicate);
        }
        state.memberships.insert(key, membership);
        Ok(())
    }

    async fn update_membership_role(
        &self,
        account_id: Uuid,
        community_id: Uuid,
        role: Role,
    ) -> RepoResult<Option<Membership>> {
        let mut state = self.state.lock().await;
        Ok(state
            .memberships
            .get_mut(&(account_id, community_id))
            .map(|m| {
                m.role = role;
                m.clone()
            }))
    }

    async fn remove_membership(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .remove(&(account_id, community_id))
            .is_some())
    }

    async fn ban_member(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        state.memberships.remove(&(account_id, community_id));
        state.bans.insert((account_id, community_id));
        Ok(())
    }

    async fn is_banned(&self, account_id: Uuid, community_id: Uuid) -> RepoResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .bans
            .contains(&(account_id, community_id)))
    }

    async fn insert_post(&self, post: Post) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if state.posts.contains_key(&post.id) {
            return Err(RepositoryError::Duplicate);
        }
        state.posts.insert(post.id, post);
        Ok(())
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&id).cloned())
    }

    async fn update_post_content(
        &self,
        id: Uuid,
        content: String,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Option<Post>> {
        let mut state = self.state.lock().await;
        Ok(state
            .posts
            .get_mut(&id)
            .filter(|p| !p.deleted)
            .map(|p| {
                p.content = content;
                p.updated_at = updated_at;
                p.clone()
            }))
    }

    async fn soft_delete_post(&self, id: Uuid, deleted_at: DateTime<Utc>) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.posts.get_mut(&id) {
            Some(post) if !post.deleted => {
                post.deleted = true;
                post.updated_at = deleted_at;
                true
            }
            _ => false,
        })
    }

    async fn insert_session(&self, session: RefreshSession) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Duplicate);
        }
        state.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<RefreshSession>> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn rotate_session(&self, parent_id: Uuid, child: RefreshSession) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&child.id) {
            return Err(RepositoryError::Duplicate);
        }
        match state.sessions.get_mut(&parent_id) {
            Some(parent) if parent.state == SessionState::Active => {
                parent.state = SessionState::Rotated;
                parent.replaced_by = Some(child.id);
            }
            _ => return Ok(false),
        }
        state.sessions.insert(child.id, child);
        Ok(true)
    }

    async fn revoke_session(&self, id: Uuid) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_where(|s| s.id == id) == 1)
    }

    async fn revoke_family(&self, family_id: Uuid) -> RepoResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_where(|s| s.family_id == family_id))
    }

    async fn revoke_account_sessions(&self, account_id: Uuid) -> RepoResult<u64> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_where(|s| s.account_id == account_id))
    }

    async fn list_active_sessions(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<RefreshSession>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<RefreshSession> = state
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && s.is_active() && s.expires_at >= now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(sessions)
    }
}
