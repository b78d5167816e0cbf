//! Connection Identity
//!
//! A `Connection` is one live transport link. The transport-facing state
//! (outbound buffer, lifecycle) lives in the presentation layer; this module
//! holds the identifier and the descriptive snapshot shared across layers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::IdentityId;
use super::message::NodeId;

/// Unique identifier for one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Descriptive snapshot of a registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub identity: IdentityId,
    pub node: NodeId,
    pub connected_at: DateTime<Utc>,
}
