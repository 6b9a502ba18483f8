use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without an access token: health and the credential
/// exchange flows. None of these handlers may trust a bearer header; they
/// authenticate through the request body (password or refresh token) only.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/signup
        // Creates an account. 409 on a taken identity, 400 on a weak password.
        .route("/auth/signup", post(handlers::signup))
        // POST /auth/login
        // Credentials in, token pair out. Starts a new refresh lineage.
        .route("/auth/login", post(handlers::login))
        // POST /auth/refresh
        // Rotation-on-use of the refresh token.
        .route("/auth/refresh", post(handlers::refresh))
        // POST /auth/logout
        // Revokes the lineage of the presented refresh token.
        .route("/auth/logout", post(handlers::logout))
}
