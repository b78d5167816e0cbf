//! Identities and Collaborator Seams
//!
//! The gateway never owns user records. Identities are issued by an external
//! identity collaborator (persistence + OAuth2 login) and are referenced here
//! through the `IdentityStore` and `OAuthFlow` traits.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Opaque stable user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Granted capability carried in token claims.
///
/// `System` is the elevated scope: it allows publishing to channels without
/// holding a subscription (server-initiated notifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Publish,
    System,
}

/// A verified identity. Immutable once issued by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub display_name: Option<String>,
    pub scopes: HashSet<Scope>,
}

impl Identity {
    pub fn new(id: IdentityId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            scopes: HashSet::from([Scope::Publish]),
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

/// Errors surfaced by the identity collaborator.
#[derive(Debug, thiserror::Error)]
pub enum IdentityStoreError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator that owns user records.
///
/// The gateway only ever resolves identities by id; it never creates,
/// updates, or deletes them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn resolve(&self, id: IdentityId) -> Result<Option<Identity>, IdentityStoreError>;
}

/// Errors surfaced by the OAuth2 login collaborator.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("invalid or expired authorization code")]
    InvalidCode,

    #[error("oauth provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// External OAuth2 collaborator. Completing a login yields a verified
/// identity which feeds token issuance.
#[async_trait]
pub trait OAuthFlow: Send + Sync {
    async fn complete_login(&self, code: &str) -> Result<Identity, OAuthError>;
}

/// In-memory `IdentityStore` used by tests and embedders that have no
/// external persistence wired in.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identities: DashMap<IdentityId, Identity>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn resolve(&self, id: IdentityId) -> Result<Option<Identity>, IdentityStoreError> {
        Ok(self.identities.get(&id).map(|e| e.value().clone()))
    }
}

/// In-memory `OAuthFlow` mapping pre-registered authorization codes to
/// identities. Unknown codes are rejected.
#[derive(Debug, Default)]
pub struct InMemoryOAuthFlow {
    codes: DashMap<String, Identity>,
}

impl InMemoryOAuthFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_code(&self, code: impl Into<String>, identity: Identity) {
        self.codes.insert(code.into(), identity);
    }
}

#[async_trait]
impl OAuthFlow for InMemoryOAuthFlow {
    async fn complete_login(&self, code: &str) -> Result<Identity, OAuthError> {
        self.codes
            .get(code)
            .map(|e| e.value().clone())
            .ok_or(OAuthError::InvalidCode)
    }
}
