//! In-Memory Bus Adapter
//!
//! Process-local backbone used by tests and single-node deployments. Several
//! `InMemoryBus` instances attached to one `InMemoryHub` behave like gateway
//! processes sharing a Redis backbone, including outage simulation via
//! `set_down` / `set_up`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::Message;

use super::{topic_for, Bus, BusError, BusHandler};

const HUB_CAPACITY: usize = 1024;

/// Shared backbone connecting several in-memory buses.
#[derive(Clone)]
pub struct InMemoryHub {
    tx: broadcast::Sender<(String, Message)>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

struct MemShared {
    interests: DashSet<String>,
    handler: RwLock<Option<BusHandler>>,
    up: AtomicBool,
    pending: Mutex<VecDeque<(String, Message)>>,
    capacity: usize,
    /// Interests replayed on each recovery, one snapshot per `set_up`.
    resubscribe_log: Mutex<Vec<Vec<String>>>,
}

/// One simulated gateway process attached to a hub.
pub struct InMemoryBus {
    tx: broadcast::Sender<(String, Message)>,
    shared: Arc<MemShared>,
}

impl InMemoryBus {
    /// Attach a new bus to the hub and start its receive task.
    pub fn attach(hub: &InMemoryHub, buffer: usize) -> Self {
        let shared = Arc::new(MemShared {
            interests: DashSet::new(),
            handler: RwLock::new(None),
            up: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
            capacity: buffer,
            resubscribe_log: Mutex::new(Vec::new()),
        });

        let mut rx = hub.tx.subscribe();
        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((topic, message)) => {
                        if !task_shared.up.load(Ordering::SeqCst) {
                            continue;
                        }
                        if !task_shared.interests.contains(&topic) {
                            continue;
                        }
                        let handler = task_shared.handler.read().clone();
                        if let Some(handler) = handler {
                            handler(message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Self {
            tx: hub.tx.clone(),
            shared,
        }
    }

    /// Simulate losing the backbone. Publishes start buffering and incoming
    /// traffic is dropped.
    pub fn set_down(&self) {
        self.shared.up.store(false, Ordering::SeqCst);
    }

    /// Simulate recovery: replay interests, then flush buffered publishes.
    pub fn set_up(&self) {
        let interests: Vec<String> = self.shared.interests.iter().map(|t| t.key().clone()).collect();
        self.shared.resubscribe_log.lock().push(interests);
        self.shared.up.store(true, Ordering::SeqCst);

        let backlog: Vec<(String, Message)> = {
            let mut pending = self.shared.pending.lock();
            pending.drain(..).collect()
        };
        for (topic, message) in backlog {
            let _ = self.tx.send((topic, message));
        }
    }

    /// Interest snapshots taken on recovery, in order.
    pub fn resubscribe_log(&self) -> Vec<Vec<String>> {
        self.shared.resubscribe_log.lock().clone()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), BusError> {
        let topic = topic_for(channel);

        if !self.is_connected() {
            let mut pending = self.shared.pending.lock();
            if pending.len() >= self.shared.capacity {
                pending.pop_front();
            }
            pending.push_back((topic, message.clone()));
            debug!(channel = %channel, "bus down, publish buffered");
            return Ok(());
        }

        // No receivers is fine: an idle hub simply drops the message.
        let _ = self.tx.send((topic, message.clone()));
        Ok(())
    }

    async fn register_interest(&self, channel: &str) -> Result<(), BusError> {
        self.shared.interests.insert(topic_for(channel));
        Ok(())
    }

    async fn unregister_interest(&self, channel: &str) -> Result<(), BusError> {
        self.shared.interests.remove(&topic_for(channel));
        Ok(())
    }

    fn set_handler(&self, handler: BusHandler) {
        *self.shared.handler.write() = Some(handler);
    }

    fn is_connected(&self) -> bool {
        self.shared.up.load(Ordering::SeqCst)
    }
}
