use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use std::{sync::Arc, time::Duration};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Identity and access core, leaf-first.
pub mod clock;
pub mod credentials;
pub mod tokens;
pub mod sessions;
pub mod authz;
pub mod gateway;

// Collaborators and HTTP surface.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use clock::{ClockState, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::AuthError;
pub use gateway::{AuthGateway, GatewayState};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signup, handlers::login, handlers::refresh, handlers::logout,
        handlers::logout_all, handlers::get_me, handlers::change_password,
        handlers::create_community, handlers::join_community, handlers::leave_community,
        handlers::update_member_role, handlers::ban_member, handlers::create_post,
        handlers::update_post, handlers::delete_post, handlers::set_account_status,
        handlers::set_account_role
    ),
    components(
        schemas(
            models::Account, models::GlobalRole, models::Role, models::Community,
            models::Membership, models::Post, models::CredentialsRequest,
            models::RefreshRequest, models::TokenResponse, models::ChangePasswordRequest,
            models::UpdateAccountStatusRequest, models::UpdateAccountRoleRequest,
            models::CreateCommunityRequest, models::UpdateMemberRoleRequest,
            models::PostContentRequest, error::ErrorResponse,
        )
    ),
    tags(
        (name = "community-portal", description = "Community Portal identity & access API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned into
/// every request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for accounts, communities, memberships, posts and sessions.
    pub repo: RepositoryState,
    /// The identity and access façade.
    pub gateway: GatewayState,
    /// Time source for timestamps and expiry.
    pub clock: ClockState,
    pub config: AppConfig,
}

impl AppState {
    /// build
    ///
    /// Wires the gateway on top of a repository and clock.
    pub fn build(
        config: AppConfig,
        repo: RepositoryState,
        clock: ClockState,
    ) -> Result<Self, AuthError> {
        let gateway = Arc::new(AuthGateway::new(repo.clone(), clock.clone(), &config)?);
        Ok(Self {
            repo,
            gateway,
            clock,
            config,
        })
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for GatewayState {
    fn from_ref(app_state: &AppState) -> GatewayState {
        app_state.gateway.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Runs the `AuthUser` extractor in front of the authenticated routes. A
/// missing, invalid or expired bearer token, or a disabled account, rejects
/// the request before any handler executes.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware,
/// and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                // The request deadline. Dropping the handler future on timeout
                // discards anything not yet committed, e.g. an unrecorded token.
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span carrying method, path and `x-request-id`.
/// Only the path is recorded; query strings and headers (which may hold
/// credentials) stay out of the logs.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        path = %request.uri().path(),
        req_id = %request_id,
    )
}
