use crate::{AppState, handlers};
use axum::{Router, routing::put};

/// Admin Router Module
///
/// Account administration, nested under `/admin`. Authentication runs in the
/// `AuthUser` extractor; the admin requirement is enforced by the
/// authorization engine (`Action::ManageAccounts`) inside the gateway.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // PUT /admin/accounts/{id}/status
        // Enable or disable an account. Disabling revokes every session.
        .route("/accounts/{id}/status", put(handlers::set_account_status))
        // PUT /admin/accounts/{id}/role
        .route("/accounts/{id}/role", put(handlers::set_account_role))
}
