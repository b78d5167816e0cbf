//! WebSocket Session State
//!
//! Per-socket state machine. A session moves Connecting → Authenticating →
//! Active and ends in Closed; Draining covers the window between the close
//! decision and the socket actually going away.

use chrono::{DateTime, Utc};

/// Lifecycle phase of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticating,
    Active,
    Draining,
    Closed,
}

/// Mutable session state owned by the socket's read loop.
#[derive(Debug)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Expiry of the access token presented at handshake. Re-checked on
    /// every publish and subscribe; an Active session does not outlive its
    /// credential.
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Connecting,
            token_expires_at: None,
        }
    }

    pub fn authenticated(&mut self, expires_at: DateTime<Utc>) {
        self.phase = SessionPhase::Active;
        self.token_expires_at = Some(expires_at);
    }

    /// The close decision is made; the socket is flushing and going away.
    pub fn draining(&mut self) {
        self.phase = SessionPhase::Draining;
    }

    pub fn closed(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Whether the session's credential has lapsed. Valid through the exact
    /// expiry instant, in line with token verification.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            Some(expires_at) => now.timestamp() > expires_at.timestamp(),
            None => true,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
