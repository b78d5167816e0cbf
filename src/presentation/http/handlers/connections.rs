//! Connection Admin Handlers
//!
//! System-scoped visibility into the node's live connections.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::application::services::TokenType;
use crate::domain::{ConnectionInfo, Scope};
use crate::shared::error::GatewayError;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub node: String,
    pub connections: Vec<ConnectionInfo>,
}

/// List every live connection on this node. Requires a bearer access token
/// carrying the system scope.
pub async fn list_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectionsResponse>, GatewayError> {
    let token = bearer_token(&headers)?;
    let claims = state.token_service.verify(token, TokenType::Access)?;
    if !claims.scopes.contains(&Scope::System) {
        return Err(GatewayError::AuthorizationDenied(
            "listing connections requires the system scope".into(),
        ));
    }

    Ok(Json(ConnectionsResponse {
        node: state.registry.node().to_string(),
        connections: state.registry.snapshot(),
    }))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| GatewayError::Malformed("missing bearer token".into()))
}
