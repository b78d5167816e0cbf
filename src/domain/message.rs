//! Message Envelope
//!
//! Messages are immutable once created. The broker that accepts a publish
//! assigns the per-channel sequence number and tags the message with its
//! origin node so bus deliveries are never relayed back onto the bus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::IdentityId;

/// Identifier of the gateway process that first accepted a publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable message envelope.
///
/// `sequence` is monotonically increasing and gap-free per channel within
/// the authority of the origin node. No cross-node total order is implied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub sender: IdentityId,
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub origin: NodeId,
}
