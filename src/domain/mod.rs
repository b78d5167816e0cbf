//! Domain Layer
//!
//! Core types of the gateway (identities, connections, messages) and the
//! trait seams through which external collaborators are consumed.

mod connection;
mod identity;
mod message;

pub use connection::{ConnectionId, ConnectionInfo};
pub use identity::{
    Identity, IdentityId, IdentityStore, IdentityStoreError, InMemoryIdentityStore,
    InMemoryOAuthFlow, OAuthError, OAuthFlow, Scope,
};
#[cfg(test)]
pub use identity::MockIdentityStore;
pub use message::{Message, NodeId};
