use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the security core.
///
/// Nothing here is retried internally; `RateLimitExceeded` is the only
/// condition the external caller is expected to retry, after backing off.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// No credential resolves for the presented bearer value.
    #[error("unauthorized: {0}")]
    Authentication(String),

    /// A credential resolved but lacks the required permission or role.
    #[error("forbidden: {0}")]
    Authorization(String),

    /// Signed token past its expiration.
    #[error("token expired")]
    TokenExpired,

    /// Bad signature or malformed token payload.
    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// `issue` called for an agent id that is already registered.
    #[error("agent {0} already registered")]
    DuplicateAgent(String),

    /// Token mint requested for an agent id the store does not know.
    #[error("agent {0} not found")]
    UnknownAgent(String),

    /// Sliding-window limit hit for this identity.
    #[error("rate limit exceeded")]
    RateLimitExceeded,
}

impl SecurityError {
    pub fn status(&self) -> StatusCode {
        match self {
            SecurityError::Authentication(_)
            | SecurityError::TokenExpired
            | SecurityError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            SecurityError::Authorization(_) => StatusCode::FORBIDDEN,
            SecurityError::DuplicateAgent(_) => StatusCode::CONFLICT,
            SecurityError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            SecurityError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({"error": self.to_string()}))).into_response()
    }
}
