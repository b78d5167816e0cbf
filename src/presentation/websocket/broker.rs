//! Channel Broker
//!
//! Owns channel membership and fan-out. Channels are created implicitly on
//! first subscribe and reaped by a grace-period sweep once empty, so bus
//! interest does not flap when the last subscriber bounces.
//!
//! Per-channel sequence numbers are assigned and frames enqueued under the
//! channel's map entry, so a racing publisher can never enqueue a higher
//! sequence ahead of a lower one. Enqueueing is a non-blocking `try_send`;
//! only bus I/O waits for the entry lock to be released, so a stalled
//! socket can never stall sequence assignment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::ChannelSettings;
use crate::domain::{ConnectionId, Identity, Message, NodeId, Scope};
use crate::infrastructure::bus::{Bus, BusError};
use crate::infrastructure::metrics::{
    CHANNELS_ACTIVE, FANOUT_DELIVERIES_TOTAL, FRAMES_DROPPED_TOTAL, MESSAGES_PUBLISHED_TOTAL,
};
use crate::shared::validation::validate_channel_name;

use super::frames::{CloseReason, ServerFrame};
use super::registry::{ConnectionRegistry, DeliverError};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid channel name: {0}")]
    InvalidChannel(&'static str),

    #[error("subscription limit reached")]
    SubscriptionLimit,

    #[error("not subscribed to channel '{0}'")]
    NotSubscribed(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl BrokerError {
    /// Stable code carried in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::InvalidChannel(_) => "INVALID_CHANNEL",
            BrokerError::SubscriptionLimit => "SUBSCRIPTION_LIMIT",
            BrokerError::NotSubscribed(_) => "NOT_SUBSCRIBED",
            BrokerError::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            BrokerError::Bus(_) => "BUS_UNAVAILABLE",
        }
    }
}

struct ChannelState {
    subscribers: HashSet<ConnectionId>,
    /// Next sequence is `sequence + 1`. Scoped to this channel on this node.
    sequence: u64,
    /// Set when the last subscriber leaves; cleared on re-subscribe.
    empty_since: Option<Instant>,
}

impl ChannelState {
    fn empty() -> Self {
        Self {
            subscribers: HashSet::new(),
            sequence: 0,
            empty_since: Some(Instant::now()),
        }
    }
}

/// Channel membership and fan-out for one gateway process.
pub struct ChannelBroker {
    channels: DashMap<String, ChannelState>,
    subscriptions: DashMap<ConnectionId, HashSet<String>>,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn Bus>,
    node: NodeId,
    settings: ChannelSettings,
}

impl ChannelBroker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        bus: Arc<dyn Bus>,
        node: NodeId,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            registry,
            bus,
            node,
            settings,
        }
    }

    /// Subscribe a connection to a channel, creating the channel on first
    /// use. Re-subscribing is a no-op.
    pub async fn subscribe(&self, conn: ConnectionId, channel: &str) -> Result<(), BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        {
            let mut subs = self.subscriptions.entry(conn).or_default();
            if subs.contains(channel) {
                return Ok(());
            }
            if subs.len() >= self.settings.max_subscriptions_per_connection {
                return Err(BrokerError::SubscriptionLimit);
            }
            subs.insert(channel.to_string());
        }

        let newly_created = {
            let mut entry = self.channels.entry(channel.to_string()).or_insert_with(|| {
                CHANNELS_ACTIVE.inc();
                ChannelState::empty()
            });
            let created = entry.subscribers.is_empty() && entry.sequence == 0;
            entry.subscribers.insert(conn);
            entry.empty_since = None;
            created
        };

        // Bus I/O only after the entry lock is released. Interest is
        // idempotent on the adapter side, so re-registering after a grace
        // revival is harmless.
        self.bus.register_interest(channel).await?;

        debug!(
            connection_id = %conn,
            channel = %channel,
            new = newly_created,
            "subscribed"
        );

        Ok(())
    }

    /// Remove one subscription. An empty channel is not deleted here; the
    /// grace sweep reaps it later.
    pub async fn unsubscribe(&self, conn: ConnectionId, channel: &str) -> Result<(), BrokerError> {
        let removed = self
            .subscriptions
            .get_mut(&conn)
            .map(|mut subs| subs.remove(channel))
            .unwrap_or(false);
        if !removed {
            return Err(BrokerError::NotSubscribed(channel.to_string()));
        }

        if let Some(mut state) = self.channels.get_mut(channel) {
            state.subscribers.remove(&conn);
            if state.subscribers.is_empty() {
                state.empty_since = Some(Instant::now());
            }
        }

        debug!(connection_id = %conn, channel = %channel, "unsubscribed");
        Ok(())
    }

    /// Drop every subscription of a connection. Called once from the socket
    /// teardown path; calling it again finds nothing.
    pub async fn unsubscribe_all(&self, conn: ConnectionId) {
        let Some((_, channels)) = self.subscriptions.remove(&conn) else {
            return;
        };

        for channel in channels {
            if let Some(mut state) = self.channels.get_mut(&channel) {
                state.subscribers.remove(&conn);
                if state.subscribers.is_empty() {
                    state.empty_since = Some(Instant::now());
                }
            }
        }
    }

    /// Publish on behalf of a connected client. Requires a subscription to
    /// the channel, or the elevated system scope.
    pub async fn publish_from_connection(
        &self,
        conn: ConnectionId,
        identity: &Identity,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<u64, BrokerError> {
        let subscribed = self
            .subscriptions
            .get(&conn)
            .map(|subs| subs.contains(channel))
            .unwrap_or(false);

        if !subscribed && !identity.has_scope(Scope::System) {
            return Err(BrokerError::AuthorizationDenied(format!(
                "publishing to '{channel}' requires a subscription"
            )));
        }

        self.publish_message(identity, channel, payload).await
    }

    /// Publish without a connection, e.g. server-initiated notifications
    /// through the HTTP surface. Requires the system scope.
    pub async fn publish_external(
        &self,
        identity: &Identity,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<u64, BrokerError> {
        if !identity.has_scope(Scope::System) {
            return Err(BrokerError::AuthorizationDenied(
                "external publish requires the system scope".into(),
            ));
        }
        self.publish_message(identity, channel, payload).await
    }

    async fn publish_message(
        &self,
        identity: &Identity,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<u64, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        // Sequence assignment and local fan-out happen together under the
        // channel entry: a racing publisher that draws the next sequence
        // cannot enqueue its frames until this one's are queued. Enqueueing
        // is `try_send`, so the entry is never held across a blocked socket.
        let message = {
            let mut entry = self.channels.entry(channel.to_string()).or_insert_with(|| {
                CHANNELS_ACTIVE.inc();
                ChannelState::empty()
            });
            entry.sequence += 1;

            let message = Message {
                channel: channel.to_string(),
                sender: identity.id,
                sequence: entry.sequence,
                payload,
                timestamp: Utc::now(),
                origin: self.node.clone(),
            };

            MESSAGES_PUBLISHED_TOTAL.with_label_values(&["local"]).inc();
            let targets: Vec<ConnectionId> = entry.subscribers.iter().copied().collect();
            self.deliver_local(&targets, &message);
            message
        };

        // A degraded bus buffers internally; only encoding failures bubble
        // up, and local delivery has already happened either way.
        if let Err(e) = self.bus.publish(channel, &message).await {
            warn!(error = %e, channel = %channel, "bus publish failed");
        }

        Ok(message.sequence)
    }

    /// Entry point for messages arriving from the distributed bus. Messages
    /// this node originated are skipped; peers deliver them to their own
    /// subscribers and we already delivered locally.
    pub fn on_bus_message(&self, message: Message) {
        if message.origin == self.node {
            return;
        }

        MESSAGES_PUBLISHED_TOTAL.with_label_values(&["bus"]).inc();

        let targets: Vec<ConnectionId> = match self.channels.get(&message.channel) {
            Some(state) => state.subscribers.iter().copied().collect(),
            None => return,
        };

        self.deliver_local(&targets, &message);
    }

    fn deliver_local(&self, targets: &[ConnectionId], message: &Message) {
        for &id in targets {
            let Some(conn) = self.registry.get(id) else {
                continue;
            };
            match conn.try_deliver(ServerFrame::from_message(message)) {
                Ok(()) => FANOUT_DELIVERIES_TOTAL.inc(),
                Err(DeliverError::BufferFull) => {
                    FRAMES_DROPPED_TOTAL
                        .with_label_values(&["slow_consumer"])
                        .inc();
                    // One stalled socket must not hold back the channel.
                    // The close is idempotent; its own task finishes teardown.
                    conn.close(CloseReason::SlowConsumer);
                    warn!(
                        connection_id = %id,
                        channel = %message.channel,
                        "outbound buffer full, closing slow consumer"
                    );
                }
                Err(DeliverError::Closed) => {
                    FRAMES_DROPPED_TOTAL.with_label_values(&["closed"]).inc();
                }
            }
        }
    }

    /// Reap channels that have been empty past the grace period, releasing
    /// their bus interest.
    pub async fn sweep_empty_channels(&self) {
        let grace = Duration::from_secs(self.settings.gc_grace_secs);
        let expired = |state: &ChannelState| {
            state.subscribers.is_empty()
                && state
                    .empty_since
                    .map(|since| since.elapsed() > grace)
                    .unwrap_or(false)
        };

        let candidates: Vec<String> = self
            .channels
            .iter()
            .filter(|e| expired(e.value()))
            .map(|e| e.key().clone())
            .collect();

        for channel in candidates {
            if self.channels.remove_if(&channel, |_, state| expired(state)).is_none() {
                continue;
            }
            CHANNELS_ACTIVE.dec();
            if let Err(e) = self.bus.unregister_interest(&channel).await {
                warn!(error = %e, channel = %channel, "bus interest release failed");
            }

            // A subscribe racing the sweep re-creates the channel after the
            // removal, and its own interest registration was a no-op while
            // the old interest still stood. Restore interest for it.
            if self.channels.contains_key(&channel) {
                if let Err(e) = self.bus.register_interest(&channel).await {
                    warn!(error = %e, channel = %channel, "bus interest restore failed");
                }
                debug!(channel = %channel, "channel revived during sweep");
                continue;
            }
            debug!(channel = %channel, "empty channel reaped");
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|state| state.subscribers.len())
            .unwrap_or(0)
    }

    /// Channels a connection is currently subscribed to.
    pub fn channels_of(&self, conn: ConnectionId) -> Vec<String> {
        self.subscriptions
            .get(&conn)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
