//! Connection Registry
//!
//! Tracks every live, authenticated connection on this process. Connections
//! are keyed by id with a secondary index by identity, so one user with
//! several devices is several registered connections.
//!
//! Closing is idempotent: the first `close` call wins and records the
//! reason; later calls from racing paths (idle sweep, slow-consumer drop,
//! the read loop's own exit) are no-ops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::domain::{ConnectionId, ConnectionInfo, Identity, IdentityId, NodeId};
use crate::infrastructure::metrics;

use super::frames::{CloseReason, ServerFrame};

/// Delivery failure into a connection's outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliverError {
    #[error("outbound buffer full")]
    BufferFull,

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),
}

/// A live authenticated connection.
pub struct RegisteredConnection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub node: NodeId,
    pub connected_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    sender: mpsc::Sender<ServerFrame>,
    shutdown: watch::Sender<Option<CloseReason>>,
}

impl RegisteredConnection {
    pub fn new(identity: Identity, node: NodeId, sender: mpsc::Sender<ServerFrame>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(None);
        Arc::new(Self {
            id: ConnectionId::generate(),
            identity,
            node,
            connected_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            sender,
            shutdown,
        })
    }

    /// Request the connection close. Returns `true` only for the call that
    /// actually initiated the close; the recorded reason never changes.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.shutdown.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.shutdown.borrow()
    }

    /// Watch for the close signal. Used by the socket writer task.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<Option<CloseReason>> {
        self.shutdown.subscribe()
    }

    /// Queue a frame without blocking. A full buffer is the caller's signal
    /// that this consumer is too slow.
    pub fn try_deliver(&self, frame: ServerFrame) -> Result<(), DeliverError> {
        if self.is_closed() {
            return Err(DeliverError::Closed);
        }
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliverError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => DeliverError::Closed,
        })
    }

    /// Descriptive snapshot for the admin surface.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            identity: self.identity.id,
            node: self.node.clone(),
            connected_at: self.connected_at,
        }
    }

    /// Record client activity for idle tracking.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Registry of live connections on this process.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<RegisteredConnection>>,
    by_identity: DashMap<IdentityId, Vec<ConnectionId>>,
    node: NodeId,
}

impl ConnectionRegistry {
    pub fn new(node: NodeId) -> Self {
        Self {
            connections: DashMap::new(),
            by_identity: DashMap::new(),
            node,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Register a connection. A colliding id is refused, not replaced.
    pub fn register(&self, conn: Arc<RegisteredConnection>) -> Result<(), RegistryError> {
        match self.connections.entry(conn.id) {
            dashmap::Entry::Occupied(_) => {
                return Err(RegistryError::DuplicateConnection(conn.id));
            }
            dashmap::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&conn));
            }
        }

        self.by_identity
            .entry(conn.identity.id)
            .or_default()
            .push(conn.id);

        metrics::set_ws_connections(self.connections.len() as i64);

        tracing::info!(
            connection_id = %conn.id,
            identity = %conn.identity.id,
            username = %conn.identity.username,
            node = %self.node,
            "connection registered"
        );

        Ok(())
    }

    /// Remove a connection. Returns the entry so callers can finish
    /// teardown (broker unsubscription) with it. Safe to call twice; the
    /// second call finds nothing.
    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<RegisteredConnection>> {
        let (_, conn) = self.connections.remove(&id)?;

        if let Some(mut ids) = self.by_identity.get_mut(&conn.identity.id) {
            ids.retain(|c| *c != id);
        }
        self.by_identity
            .remove_if(&conn.identity.id, |_, ids| ids.is_empty());

        metrics::set_ws_connections(self.connections.len() as i64);

        tracing::info!(
            connection_id = %id,
            identity = %conn.identity.id,
            reason = ?conn.close_reason(),
            "connection deregistered"
        );

        Some(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<RegisteredConnection>> {
        self.connections.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// All live connections of one identity, across devices.
    pub fn find_by_identity(&self, identity: IdentityId) -> Vec<Arc<RegisteredConnection>> {
        let Some(ids) = self.by_identity.get(&identity) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|e| Arc::clone(e.value())))
            .collect()
    }

    /// Connections silent for longer than `timeout`. The caller closes
    /// them; eviction itself happens in each socket's own task.
    pub fn idle_connections(&self, timeout: Duration) -> Vec<Arc<RegisteredConnection>> {
        self.connections
            .iter()
            .filter(|e| e.value().idle_for() > timeout)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Snapshot of every live connection on this node.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections.iter().map(|e| e.value().info()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
