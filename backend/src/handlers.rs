use crate::{
    AppState,
    auth::AuthUser,
    authz::{Action, Resource},
    error::{AuthError, ErrorResponse, RepositoryError},
    models::{
        Account, ChangePasswordRequest, Community, CreateCommunityRequest, CredentialsRequest,
        Membership, Post, PostContentRequest, RefreshRequest, Role, TokenResponse,
        UpdateAccountRoleRequest, UpdateAccountStatusRequest, UpdateMemberRoleRequest,
    },
    tokens::{RefreshToken, TokenPair},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

const MAX_COMMUNITY_NAME_LEN: usize = 64;
const MAX_POST_LEN: usize = 40_000;

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token.into_string(),
            token_type: "Bearer".to_string(),
            expires_in: pair.access_expires_in,
        }
    }
}

// --- Auth Endpoints ---

/// signup
///
/// [Public Route] Registers a new account with the `member` global role.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Registered", body = Account),
        (status = 400, description = "WeakPassword / InvalidIdentity", body = ErrorResponse),
        (status = 409, description = "DuplicateIdentity", body = ErrorResponse)
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<Account>), AuthError> {
    let account = state
        .gateway
        .signup(&payload.identity, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// login
///
/// [Public Route] Exchanges credentials for an access/refresh token pair.
/// Unknown identities and wrong passwords are indistinguishable.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Logged in", body = TokenResponse),
        (status = 401, description = "InvalidCredentials", body = ErrorResponse),
        (status = 403, description = "AccountDisabled", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let pair = state
        .gateway
        .login(&payload.identity, &payload.password)
        .await?;
    Ok(Json(pair.into()))
}

/// refresh
///
/// [Public Route] Rotates a refresh token. The presented token is consumed;
/// presenting it again revokes the whole login lineage (`Reused`).
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated", body = TokenResponse),
        (status = 401, description = "Expired / Revoked / Reused / Malformed", body = ErrorResponse)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let token = RefreshToken::from_wire(payload.refresh_token);
    let pair = state.gateway.refresh(&token).await?;
    Ok(Json(pair.into()))
}

/// logout
///
/// [Public Route] Revokes the login the refresh token belongs to. Always 204
/// unless storage fails.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshRequest,
    responses((status = 204, description = "Logged out"))
)]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AuthError> {
    let token = RefreshToken::from_wire(payload.refresh_token);
    state.gateway.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// logout_all
///
/// [Authenticated Route] Revokes every refresh session of the caller.
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses((status = 204, description = "All sessions revoked"))
)]
pub async fn logout_all(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AuthError> {
    state.gateway.logout_everywhere(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// get_me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Account", body = Account))
)]
pub async fn get_me(AuthUser { account, .. }: AuthUser) -> Json<Account> {
    Json(account)
}

/// change_password
///
/// [Authenticated Route] Replaces the caller's password and signs out every session.
#[utoipa::path(
    put,
    path = "/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "WeakPassword", body = ErrorResponse),
        (status = 401, description = "InvalidCredentials", body = ErrorResponse)
    )
)]
pub async fn change_password(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AuthError> {
    state
        .gateway
        .change_password(id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Community Endpoints ---

/// create_community
///
/// [Authenticated Route] Creates a community; the creator becomes its owner.
#[utoipa::path(
    post,
    path = "/communities",
    request_body = CreateCommunityRequest,
    responses(
        (status = 201, description = "Created", body = Community),
        (status = 409, description = "Name taken", body = ErrorResponse)
    )
)]
pub async fn create_community(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCommunityRequest>,
) -> Result<(StatusCode, Json<Community>), AuthError> {
    state
        .gateway
        .require_permission(&account, Action::CreateCommunity, Resource::Platform)
        .await?;

    let name = payload.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_COMMUNITY_NAME_LEN {
        return Err(AuthError::InvalidRequest(format!(
            "name must be 1 to {MAX_COMMUNITY_NAME_LEN} characters"
        )));
    }

    let now = state.clock.now();
    let community = Community {
        id: Uuid::new_v4(),
        name,
        owner_id: account.id,
        created_at: now,
    };
    let owner = Membership {
        account_id: account.id,
        community_id: community.id,
        role: Role::Owner,
        joined_at: now,
    };

    match state.repo.insert_community(community.clone(), owner).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(community))),
        Err(RepositoryError::Duplicate) => Err(AuthError::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// join_community
///
/// [Authenticated Route] Joins as a plain member. Idempotent for existing
/// members; banned accounts are refused.
#[utoipa::path(
    post,
    path = "/communities/{id}/members",
    params(("id" = Uuid, Path, description = "Community ID")),
    responses(
        (status = 201, description = "Joined", body = Membership),
        (status = 403, description = "Banned", body = ErrorResponse)
    )
)]
pub async fn join_community(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Membership>), AuthError> {
    state
        .gateway
        .require_permission(&account, Action::JoinCommunity, Resource::Community(community_id))
        .await?;

    if let Some(existing) = state.repo.get_membership(account.id, community_id).await? {
        return Ok((StatusCode::OK, Json(existing)));
    }

    let membership = Membership {
        account_id: account.id,
        community_id,
        role: Role::Member,
        joined_at: state.clock.now(),
    };
    match state.repo.insert_membership(membership.clone()).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(membership))),
        Err(RepositoryError::Duplicate) => state
            .repo
            .get_membership(account.id, community_id)
            .await?
            .map(|m| (StatusCode::OK, Json(m)))
            .ok_or(AuthError::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// leave_community
///
/// [Authenticated Route] Drops the caller's membership. The owner cannot leave.
#[utoipa::path(
    delete,
    path = "/communities/{id}/members/me",
    params(("id" = Uuid, Path, description = "Community ID")),
    responses(
        (status = 204, description = "Left"),
        (status = 404, description = "Not a member", body = ErrorResponse)
    )
)]
pub async fn leave_community(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let membership = state
        .repo
        .get_membership(id, community_id)
        .await?
        .ok_or(AuthError::NotFound)?;
    if membership.role == Role::Owner {
        return Err(AuthError::InsufficientRole);
    }
    state.repo.remove_membership(id, community_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// update_member_role
///
/// [Authenticated Route] Owner-only. Promotes or demotes a member between
/// `member` and `moderator`. Ownership cannot be assigned here.
#[utoipa::path(
    put,
    path = "/communities/{id}/members/{account_id}",
    params(
        ("id" = Uuid, Path, description = "Community ID"),
        ("account_id" = Uuid, Path, description = "Member account ID")
    ),
    request_body = UpdateMemberRoleRequest,
    responses(
        (status = 200, description = "Updated", body = Membership),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn update_member_role(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path((community_id, target_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Membership>, AuthError> {
    state
        .gateway
        .require_permission(
            &account,
            Action::AssignMemberRole,
            Resource::Community(community_id),
        )
        .await?;

    if !matches!(payload.role, Role::Member | Role::Moderator) {
        return Err(AuthError::InvalidRequest(
            "role must be member or moderator".to_string(),
        ));
    }
    let target_role = state
        .gateway
        .require_outranks(&account, community_id, target_id)
        .await?;
    if target_role == Role::None {
        return Err(AuthError::NotFound);
    }
    // Admins outrank everyone, but the owner's membership is never rewritten.
    if target_role == Role::Owner {
        return Err(AuthError::InsufficientRole);
    }

    state
        .repo
        .update_membership_role(target_id, community_id, payload.role)
        .await?
        .map(Json)
        .ok_or(AuthError::NotFound)
}

/// ban_member
///
/// [Authenticated Route] Moderator-or-above. Removes the member and blocks
/// re-joining; a banned author also loses the right to edit their own posts.
#[utoipa::path(
    post,
    path = "/communities/{id}/bans/{account_id}",
    params(
        ("id" = Uuid, Path, description = "Community ID"),
        ("account_id" = Uuid, Path, description = "Account to ban")
    ),
    responses(
        (status = 204, description = "Banned"),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn ban_member(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path((community_id, target_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AuthError> {
    state
        .gateway
        .require_permission(&account, Action::BanMember, Resource::Community(community_id))
        .await?;
    let target_role = state
        .gateway
        .require_outranks(&account, community_id, target_id)
        .await?;
    if target_role == Role::Owner {
        return Err(AuthError::InsufficientRole);
    }

    state.repo.ban_member(target_id, community_id).await?;
    tracing::info!(
        community_id = %community_id,
        account_id = %target_id,
        moderator_id = %account.id,
        "member banned"
    );
    Ok(StatusCode::NO_CONTENT)
}

// --- Post Endpoints ---

fn validate_content(content: &str) -> Result<String, AuthError> {
    let content = content.trim();
    if content.is_empty() || content.len() > MAX_POST_LEN {
        return Err(AuthError::InvalidRequest(format!(
            "content must be 1 to {MAX_POST_LEN} bytes"
        )));
    }
    Ok(content.to_string())
}

/// create_post
///
/// [Authenticated Route] Requires membership in the community.
#[utoipa::path(
    post,
    path = "/communities/{id}/posts",
    params(("id" = Uuid, Path, description = "Community ID")),
    request_body = PostContentRequest,
    responses(
        (status = 201, description = "Created", body = Post),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn create_post(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
    Json(payload): Json<PostContentRequest>,
) -> Result<(StatusCode, Json<Post>), AuthError> {
    state
        .gateway
        .require_permission(&account, Action::CreatePost, Resource::Community(community_id))
        .await?;

    let now = state.clock.now();
    let post = Post {
        id: Uuid::new_v4(),
        author_id: account.id,
        community_id,
        content: validate_content(&payload.content)?,
        created_at: now,
        updated_at: now,
        deleted: false,
    };
    state.repo.insert_post(post.clone()).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// update_post
///
/// [Authenticated Route] The author, or a moderator and above.
#[utoipa::path(
    put,
    path = "/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    request_body = PostContentRequest,
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn update_post(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostContentRequest>,
) -> Result<Json<Post>, AuthError> {
    state
        .gateway
        .require_permission(&account, Action::EditPost, Resource::Post(id))
        .await?;

    let content = validate_content(&payload.content)?;
    state
        .repo
        .update_post_content(id, content, state.clock.now())
        .await?
        .map(Json)
        .ok_or(AuthError::NotFound)
}

/// delete_post
///
/// [Authenticated Route] Soft-deletes. The author, or a moderator and above.
#[utoipa::path(
    delete,
    path = "/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "InsufficientRole", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn delete_post(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    state
        .gateway
        .require_permission(&account, Action::DeletePost, Resource::Post(id))
        .await?;

    if state.repo.soft_delete_post(id, state.clock.now()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AuthError::NotFound)
    }
}

// --- Admin Endpoints ---

/// set_account_status
///
/// [Admin Route] Enables or disables an account. Disabling revokes all of
/// its refresh sessions.
#[utoipa::path(
    put,
    path = "/admin/accounts/{id}/status",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = UpdateAccountStatusRequest,
    responses(
        (status = 200, description = "Updated", body = Account),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn set_account_status(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAccountStatusRequest>,
) -> Result<Json<Account>, AuthError> {
    let updated = state
        .gateway
        .set_account_active(&account, id, payload.active)
        .await?;
    Ok(Json(updated))
}

/// set_account_role
///
/// [Admin Route] Changes an account's global role.
#[utoipa::path(
    put,
    path = "/admin/accounts/{id}/role",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = UpdateAccountRoleRequest,
    responses(
        (status = 200, description = "Updated", body = Account),
        (status = 403, description = "InsufficientRole", body = ErrorResponse)
    )
)]
pub async fn set_account_role(
    AuthUser { account, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAccountRoleRequest>,
) -> Result<Json<Account>, AuthError> {
    let updated = state
        .gateway
        .set_global_role(&account, id, payload.role)
        .await?;
    Ok(Json(updated))
}
