//! Redis Pub/Sub Bus Adapter
//!
//! Backs the distributed bus with Redis pub/sub. A dedicated listener task
//! owns the pub/sub connection; subscription changes travel to it over a
//! control channel so interest registration never blocks on the backbone.
//!
//! On connection loss the adapter enters degraded mode: publishes are
//! buffered (bounded, oldest dropped) and the listener reconnects with
//! exponential backoff, re-subscribing every held interest exactly once
//! before flushing the buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RedisSettings;
use crate::domain::Message;
use crate::infrastructure::metrics::{BUS_CONNECTED, BUS_RECONNECTS_TOTAL, FRAMES_DROPPED_TOTAL};

use super::{topic_for, Bus, BusError, BusHandler};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

enum SubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

struct BusShared {
    /// Topics this process is interested in. Survives reconnects.
    interests: DashSet<String>,
    handler: RwLock<Option<BusHandler>>,
    connected: AtomicBool,
    /// Publishes held back while degraded, as (topic, encoded payload).
    pending: Mutex<VecDeque<(String, String)>>,
    capacity: usize,
}

impl BusShared {
    fn buffer(&self, topic: String, payload: String) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            pending.pop_front();
            FRAMES_DROPPED_TOTAL.with_label_values(&["bus_overflow"]).inc();
        }
        pending.push_back((topic, payload));
    }

    /// Oldest buffered publish, if any.
    fn next_pending(&self) -> Option<(String, String)> {
        self.pending.lock().pop_front()
    }

    /// Put a publish back at the head of the buffer, ahead of everything
    /// buffered after it.
    fn restore_pending(&self, topic: String, payload: String) {
        self.pending.lock().push_front((topic, payload));
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            BUS_CONNECTED.set(0);
        }
    }
}

/// Redis-backed distributed bus.
pub struct RedisBus {
    publisher: ConnectionManager,
    shared: Arc<BusShared>,
    control_tx: mpsc::UnboundedSender<SubCommand>,
}

impl RedisBus {
    /// Connect to Redis and start the pub/sub listener task.
    ///
    /// `buffer` bounds the number of publishes retained across an outage.
    pub async fn connect(settings: &RedisSettings, buffer: usize) -> Result<Self, BusError> {
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let shared = Arc::new(BusShared {
            interests: DashSet::new(),
            handler: RwLock::new(None),
            connected: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            capacity: buffer,
        });

        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_listener(
            client,
            publisher.clone(),
            Arc::clone(&shared),
            control_rx,
        ));

        Ok(Self {
            publisher,
            shared,
            control_tx,
        })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, message: &Message) -> Result<(), BusError> {
        let topic = topic_for(channel);
        let payload = serde_json::to_string(message)?;

        if !self.is_connected() {
            self.shared.buffer(topic, payload);
            return Ok(());
        }

        let mut conn = self.publisher.clone();
        match conn.publish::<_, _, ()>(&topic, &payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, topic = %topic, "bus publish failed, buffering");
                self.shared.mark_disconnected();
                self.shared.buffer(topic, payload);
                Ok(())
            }
        }
    }

    async fn register_interest(&self, channel: &str) -> Result<(), BusError> {
        let topic = topic_for(channel);
        if self.shared.interests.insert(topic.clone()) {
            // Listener gone means shutdown; interests are replayed on
            // reconnect anyway.
            let _ = self.control_tx.send(SubCommand::Subscribe(topic));
        }
        Ok(())
    }

    async fn unregister_interest(&self, channel: &str) -> Result<(), BusError> {
        let topic = topic_for(channel);
        if self.shared.interests.remove(&topic).is_some() {
            let _ = self.control_tx.send(SubCommand::Unsubscribe(topic));
        }
        Ok(())
    }

    fn set_handler(&self, handler: BusHandler) {
        *self.shared.handler.write() = Some(handler);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

async fn run_listener(
    client: redis::Client,
    publisher: ConnectionManager,
    shared: Arc<BusShared>,
    mut control_rx: mpsc::UnboundedReceiver<SubCommand>,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut first_session = true;

    loop {
        let pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                warn!(error = %e, "bus connection failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        let (mut sink, mut stream) = pubsub.split();

        // Replay every held interest once per session.
        let topics: Vec<String> = shared.interests.iter().map(|t| t.key().clone()).collect();
        let mut subscribed = true;
        for topic in &topics {
            if let Err(e) = sink.subscribe(topic).await {
                warn!(error = %e, topic = %topic, "bus resubscribe failed");
                subscribed = false;
                break;
            }
        }
        if !subscribed {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            continue;
        }

        shared.connected.store(true, Ordering::SeqCst);
        BUS_CONNECTED.set(1);
        if !first_session {
            BUS_RECONNECTS_TOTAL.inc();
        }
        first_session = false;
        backoff = INITIAL_BACKOFF;

        info!(interests = topics.len(), "bus connected");
        flush_pending(publisher.clone(), &shared).await;

        loop {
            tokio::select! {
                cmd = control_rx.recv() => match cmd {
                    Some(SubCommand::Subscribe(topic)) => {
                        if let Err(e) = sink.subscribe(&topic).await {
                            warn!(error = %e, topic = %topic, "bus subscribe failed");
                            break;
                        }
                    }
                    Some(SubCommand::Unsubscribe(topic)) => {
                        if let Err(e) = sink.unsubscribe(&topic).await {
                            warn!(error = %e, topic = %topic, "bus unsubscribe failed");
                            break;
                        }
                    }
                    // Bus dropped, stop listening.
                    None => return,
                },
                msg = stream.next() => match msg {
                    Some(msg) => dispatch(&shared, msg),
                    None => break,
                },
            }
        }

        shared.mark_disconnected();
        warn!("bus connection lost, entering degraded mode");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn dispatch(shared: &BusShared, msg: redis::Msg) {
    let message: Message = match serde_json::from_slice(msg.get_payload_bytes()) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, channel = %msg.get_channel_name(), "undecodable bus message");
            return;
        }
    };

    let handler = shared.handler.read().clone();
    if let Some(handler) = handler {
        handler(message);
    }
}

/// Drain the backlog one publish at a time. On failure the failed item goes
/// back to the head of the buffer and the unflushed tail stays where it is,
/// so nothing queued across the outage is lost.
async fn flush_pending(publisher: ConnectionManager, shared: &BusShared) {
    let mut conn = publisher;
    let mut flushed = 0usize;

    while let Some((topic, payload)) = shared.next_pending() {
        if let Err(e) = conn.publish::<_, _, ()>(&topic, &payload).await {
            warn!(error = %e, topic = %topic, "buffered publish failed, keeping backlog");
            shared.mark_disconnected();
            shared.restore_pending(topic, payload);
            return;
        }
        flushed += 1;
    }

    if flushed > 0 {
        debug!(count = flushed, "flushed buffered bus publishes");
    }
}
