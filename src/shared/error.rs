//! Gateway Error Types
//!
//! Centralized error taxonomy with Axum integration for the HTTP surface
//! and stable string codes for WebSocket error frames.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::application::services::{RefreshError, TokenRejected};
use crate::domain::{ConnectionId, IdentityStoreError, OAuthError};

/// Gateway error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication rejected: {0}")]
    AuthRejected(#[from] TokenRejected),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("outbound buffer full, consumer too slow")]
    SlowConsumer,

    #[error("distributed bus unavailable")]
    BusUnavailable,

    #[error("channel broker overloaded: {0}")]
    Overloaded(String),

    #[error("not subscribed to channel '{0}'")]
    NotSubscribed(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("login failed: {0}")]
    Login(#[from] OAuthError),

    #[error("identity store error: {0}")]
    IdentityStore(#[from] IdentityStoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code carried in WebSocket error frames and
    /// HTTP error bodies. Clients branch on these, never on message text.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthRejected(TokenRejected::Expired) => "AUTH_EXPIRED",
            GatewayError::AuthRejected(_) => "AUTH_REJECTED",
            GatewayError::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            GatewayError::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
            GatewayError::SlowConsumer => "SLOW_CONSUMER",
            GatewayError::BusUnavailable => "BUS_UNAVAILABLE",
            GatewayError::Overloaded(_) => "OVERLOADED",
            GatewayError::NotSubscribed(_) => "NOT_SUBSCRIBED",
            GatewayError::Malformed(_) => "MALFORMED_FRAME",
            GatewayError::Login(_) => "LOGIN_FAILED",
            GatewayError::IdentityStore(_) => "IDENTITY_STORE_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RefreshError> for GatewayError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Rejected(rejected) => GatewayError::AuthRejected(rejected),
            RefreshError::UnknownIdentity => {
                GatewayError::AuthorizationDenied("identity no longer exists".into())
            }
            RefreshError::Store(e) => GatewayError::IdentityStore(e),
            RefreshError::Issue(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

/// Error response body for the HTTP surface
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::AuthRejected(_) | GatewayError::Login(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::DuplicateConnection(_) => StatusCode::CONFLICT,
            GatewayError::NotSubscribed(_) | GatewayError::Malformed(_) => StatusCode::BAD_REQUEST,
            GatewayError::SlowConsumer | GatewayError::Overloaded(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::BusUnavailable
            | GatewayError::IdentityStore(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
