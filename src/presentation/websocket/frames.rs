//! Wire Frames
//!
//! JSON frames exchanged over the WebSocket, tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionId, IdentityId, Message};

/// Frames sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection. Anything else before a successful
    /// auth closes the socket.
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish {
        channel: String,
        payload: serde_json::Value,
    },
    Ping,
    Logout,
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges a successful auth handshake.
    Ready {
        connection_id: ConnectionId,
        heartbeat_interval_ms: u64,
    },
    Message {
        channel: String,
        sender: IdentityId,
        sequence: u64,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Pong,
    Error {
        code: &'static str,
        detail: String,
    },
}

impl ServerFrame {
    pub fn from_message(message: &Message) -> Self {
        ServerFrame::Message {
            channel: message.channel.clone(),
            sender: message.sender,
            sequence: message.sequence,
            payload: message.payload.clone(),
            timestamp: message.timestamp,
        }
    }

    pub fn error(code: &'static str, detail: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            detail: detail.into(),
        }
    }
}

/// Why a connection was closed. Sent as the close frame reason so clients
/// can distinguish eviction from orderly shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AuthFailure,
    IdleTimeout,
    SlowConsumer,
    Logout,
    ForcedLogout,
    TransportError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::AuthFailure => "auth_failure",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::Logout => "logout",
            CloseReason::ForcedLogout => "forced_logout",
            CloseReason::TransportError => "transport_error",
        }
    }
}
