use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use uuid::Uuid;

use crate::{
    error::AuthError,
    gateway::GatewayState,
    models::Account,
};

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. Handlers use `id`
/// directly and pass `account` to `AuthGateway::require_permission`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub account: Account,
}

/// AuthUser Extractor Implementation
///
/// Makes `AuthUser` usable as a handler argument, separating authentication
/// from handler logic:
/// 1. Token Extraction: `Authorization: Bearer <access token>`.
/// 2. Verification: signature, `kid` and expiry via the token service.
/// 3. Account Lookup: the account must still exist and be active.
///
/// Rejection: an `AuthError`, rendered as 401 (or 403 for disabled accounts).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    GatewayState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gateway = GatewayState::from_ref(state);

        let token = bearer_token(parts).ok_or(AuthError::Unauthenticated)?;
        let account = gateway.authenticate(token).await?;

        Ok(AuthUser {
            id: account.id,
            account,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
