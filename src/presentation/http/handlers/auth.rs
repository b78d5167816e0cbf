//! Authentication Handlers
//!
//! Token issuance over HTTP: OAuth2 code exchange, sliding refresh, and
//! administrative force-logout.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::services::TokenType;
use crate::domain::{IdentityId, Scope};
use crate::presentation::websocket::CloseReason;
use crate::shared::error::GatewayError;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Authorization code from the OAuth2 provider.
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub token_type: &'static str,
}

/// Complete an OAuth2 login and issue an access/refresh token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, GatewayError> {
    let identity = state.oauth.complete_login(&req.code).await?;

    let access = state
        .token_service
        .issue(&identity, TokenType::Access)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    let refresh = state
        .token_service
        .issue(&identity, TokenType::Refresh)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    tracing::info!(identity = %identity.id, "login completed");

    Ok(Json(TokenPairResponse {
        access_token: access.token,
        access_expires_at: access.expires_at,
        refresh_token: refresh.token,
        refresh_expires_at: refresh.expires_at,
        token_type: "Bearer",
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: &'static str,
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let access = state
        .token_service
        .refresh(&req.refresh_token, state.identities.as_ref())
        .await?;

    Ok(Json(TokenResponse {
        access_token: access.token,
        expires_at: access.expires_at,
        token_type: "Bearer",
    }))
}

#[derive(Debug, Deserialize)]
pub struct ForceLogoutRequest {
    /// Access token of the caller. Must carry the system scope.
    pub token: String,
    /// Identity whose connections are evicted.
    pub identity_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ForceLogoutResponse {
    pub closed: usize,
}

/// Evict every live connection of an identity on this node. Each socket's
/// own task finishes teardown; this only flips the close signal.
pub async fn force_logout(
    State(state): State<AppState>,
    Json(req): Json<ForceLogoutRequest>,
) -> Result<Json<ForceLogoutResponse>, GatewayError> {
    let claims = state.token_service.verify(&req.token, TokenType::Access)?;
    if !claims.scopes.contains(&Scope::System) {
        return Err(GatewayError::AuthorizationDenied(
            "force logout requires the system scope".into(),
        ));
    }

    let target = IdentityId(req.identity_id);
    let connections = state.registry.find_by_identity(target);
    let mut closed = 0;
    for conn in &connections {
        if conn.close(CloseReason::ForcedLogout) {
            closed += 1;
        }
    }

    tracing::info!(identity = %target, closed, "force logout");

    Ok(Json(ForceLogoutResponse { closed }))
}