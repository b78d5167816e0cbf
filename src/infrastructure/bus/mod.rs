//! Distributed Bus
//!
//! Cross-process message backbone. Every gateway process publishes locally
//! accepted messages to the bus and receives messages published by peer
//! processes, keyed by channel topic.
//!
//! Adapters are expected to degrade, not fail: when the backbone is
//! unreachable, `publish` buffers (bounded, oldest dropped) and local
//! delivery continues. `is_connected` exposes the degradation to callers.

mod memory;
mod redis_bus;

pub use memory::{InMemoryBus, InMemoryHub};
pub use redis_bus::RedisBus;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Message;

/// Prefix shared by all bus topics so a single backbone can host several
/// gateway deployments side by side.
const TOPIC_PREFIX: &str = "relay:channel:";

/// Map a channel name to its bus topic.
pub fn topic_for(channel: &str) -> String {
    format!("{TOPIC_PREFIX}{channel}")
}

/// Inverse of [`topic_for`]. Returns `None` for foreign topics.
pub fn channel_of(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX)
}

/// Errors surfaced by bus adapters.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("bus message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Callback invoked for every message received from the backbone.
///
/// Handlers must be cheap and non-blocking; adapters call them from their
/// receive loop.
pub type BusHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Cross-process message backbone.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a message to the channel's topic. In degraded mode the
    /// message is buffered and flushed on reconnect; the call still
    /// succeeds so local fan-out is never held hostage by the backbone.
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), BusError>;

    /// Start receiving messages for a channel's topic.
    async fn register_interest(&self, channel: &str) -> Result<(), BusError>;

    /// Stop receiving messages for a channel's topic.
    async fn unregister_interest(&self, channel: &str) -> Result<(), BusError>;

    /// Install the receive callback. Replaces any previous handler.
    fn set_handler(&self, handler: BusHandler);

    /// Whether the backbone is currently reachable.
    fn is_connected(&self) -> bool;
}
