use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// AuthError
///
/// The failure taxonomy of the identity and access core. Every component
/// surfaces one of these to the `AuthGateway`, and the gateway hands it to the
/// HTTP layer unchanged. The `IntoResponse` impl below is the single place
/// where a failure becomes an external status, so no internal detail (hash
/// algorithm, key state, SQL error) ever leaks to the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("identity already registered")]
    DuplicateIdentity,

    #[error("password too weak: {0}")]
    WeakPassword(String),

    #[error("identity is not acceptable")]
    InvalidIdentity,

    /// Returned identically for an unknown identity and a wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    AccountDisabled,

    #[error("token expired")]
    Expired,

    #[error("token malformed")]
    Malformed,

    #[error("token signature invalid")]
    SignatureInvalid,

    #[error("token revoked")]
    Revoked,

    /// A refresh token that was already rotated away was presented again.
    /// The whole lineage has been revoked by the time the caller sees this.
    #[error("refresh token reused")]
    Reused,

    #[error("insufficient role")]
    InsufficientRole,

    #[error("missing bearer credential")]
    Unauthenticated,

    #[error("resource not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("resource already exists")]
    Conflict,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::DuplicateIdentity => "DuplicateIdentity",
            AuthError::WeakPassword(_) => "WeakPassword",
            AuthError::InvalidIdentity => "InvalidIdentity",
            AuthError::InvalidCredentials => "InvalidCredentials",
            AuthError::AccountDisabled => "AccountDisabled",
            AuthError::Expired => "Expired",
            AuthError::Malformed => "Malformed",
            AuthError::SignatureInvalid => "SignatureInvalid",
            AuthError::Revoked => "Revoked",
            AuthError::Reused => "Reused",
            AuthError::InsufficientRole => "InsufficientRole",
            AuthError::Unauthenticated => "Unauthenticated",
            AuthError::NotFound => "NotFound",
            AuthError::InvalidRequest(_) => "InvalidRequest",
            AuthError::Conflict => "Conflict",
            AuthError::Storage(_) | AuthError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::DuplicateIdentity | AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::WeakPassword(_)
            | AuthError::InvalidIdentity
            | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::Expired
            | AuthError::Malformed
            | AuthError::SignatureInvalid
            | AuthError::Revoked
            | AuthError::Reused
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::InsufficientRole => StatusCode::FORBIDDEN,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// ErrorResponse
///
/// JSON body returned with every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS)]
#[ts(export)]
pub struct ErrorResponse {
    #[schema(example = "InvalidCredentials")]
    pub error: String,
    /// Present for `WeakPassword` and `InvalidRequest`, naming the unmet rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let detail = match &self {
            AuthError::WeakPassword(reason) | AuthError::InvalidRequest(reason) => {
                Some(reason.clone())
            }
            AuthError::Storage(msg) | AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed with an internal error");
                None
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            detail,
        };
        (self.status(), Json(body)).into_response()
    }
}

/// RepositoryError
///
/// Failures reported by the persistence collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A uniqueness constraint (identity, community name, session id) was hit.
    #[error("duplicate key")]
    Duplicate,

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Duplicate,
            _ => RepositoryError::Backend(err.to_string()),
        }
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// ConfigError
///
/// Raised by `AppConfig::load` when the environment is incomplete or invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}
