use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Roles ---

/// GlobalRole
///
/// Platform-wide role of an account. `Admin` bypasses every resource check in
/// the authorization engine (but not the disabled-account check).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum GlobalRole {
    #[default]
    Member,
    Admin,
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::Member => "member",
            GlobalRole::Admin => "admin",
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(GlobalRole::Member),
            "admin" => Ok(GlobalRole::Admin),
            other => Err(format!("unknown global role '{other}'")),
        }
    }
}

/// Role
///
/// Community-scoped role. Declaration order is the privilege order, so the
/// derived `Ord` gives `None < Member < Moderator < Owner` and a permission
/// check is a plain `>=` comparison. `None` is the effective role of an
/// account with no membership; it is never stored.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    TS,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    None,
    Member,
    Moderator,
    Owner,
}

impl Role {
    /// Every role, lowest first.
    pub const ALL: [Role; 4] = [Role::None, Role::Member, Role::Moderator, Role::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Role::None),
            "member" => Ok(Role::Member),
            "moderator" => Ok(Role::Moderator),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown community role '{other}'")),
        }
    }
}

// --- Core Records ---

/// Account
///
/// Public view of a registered account. The password hash lives in
/// `repository::AccountRecord` and never leaves the credential store, so this
/// struct is safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Account {
    pub id: Uuid,
    /// Normalized (trimmed, lower-cased) handle or email.
    pub identity: String,
    pub global_role: GlobalRole,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    /// Accounts are soft-disabled, never deleted.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Membership
///
/// Unique per (account, community) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Membership {
    pub account_id: Uuid,
    pub community_id: Uuid,
    pub role: Role,
    #[ts(type = "string")]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub community_id: Uuid,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// SessionState
///
/// `Active -> Rotated` on refresh, `Active -> Revoked` on logout, ban or
/// lineage revocation. Both `Rotated` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Active,
    Rotated,
    Revoked,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Rotated => "rotated",
            SessionState::Revoked => "revoked",
        }
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionState::Active),
            "rotated" => Ok(SessionState::Rotated),
            "revoked" => Ok(SessionState::Revoked),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

/// RefreshSession
///
/// Server-side record behind one opaque refresh token. `family_id` is the id
/// of the session created at login; every rotation descendant shares it, which
/// is what makes whole-lineage revocation a single keyed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: Uuid,
    pub account_id: Uuid,
    pub family_id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Hex SHA-256 of the token's secret part.
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
    pub replaced_by: Option<Uuid>,
}

impl RefreshSession {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

// --- Request Payloads (Input) ---

/// Input payload for `POST /auth/signup` and `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CredentialsRequest {
    #[schema(example = "ada@example.com")]
    pub identity: String,
    pub password: String,
}

/// Input payload for `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateAccountStatusRequest {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateAccountRoleRequest {
    pub role: GlobalRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateCommunityRequest {
    #[schema(example = "rustaceans")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}

/// Input payload for creating or editing a post.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PostContentRequest {
    pub content: String,
}

// --- Responses (Output) ---

/// TokenResponse
///
/// Returned by login and refresh. `refreshToken` is opaque to the client.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}
