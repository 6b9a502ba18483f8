use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Authenticated Router Module
///
/// Routes that require a valid, unexpired access token for an active
/// account. The `auth_middleware` layer rejects anything else before a
/// handler runs; each handler then calls `require_permission` for its
/// resource-scoped check.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session & Account ---
        .route("/auth/logout-all", post(handlers::logout_all))
        .route("/me", get(handlers::get_me))
        .route("/me/password", put(handlers::change_password))
        // --- Communities ---
        // POST /communities
        // The creator becomes the owner member.
        .route("/communities", post(handlers::create_community))
        .route("/communities/{id}/members", post(handlers::join_community))
        .route(
            "/communities/{id}/members/me",
            delete(handlers::leave_community),
        )
        // PUT /communities/{id}/members/{account_id}
        // Owner-only role assignment.
        .route(
            "/communities/{id}/members/{account_id}",
            put(handlers::update_member_role),
        )
        .route(
            "/communities/{id}/bans/{account_id}",
            post(handlers::ban_member),
        )
        // --- Posts ---
        .route("/communities/{id}/posts", post(handlers::create_post))
        // PUT/DELETE /posts/{id}
        // Author, or moderator and above in the post's community.
        .route(
            "/posts/{id}",
            put(handlers::update_post).delete(handlers::delete_post),
        )
}
