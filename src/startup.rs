//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;

use crate::application::services::TokenService;
use crate::config::Settings;
use crate::domain::{IdentityStore, NodeId, OAuthFlow};
use crate::infrastructure::bus::{Bus, RedisBus};
use crate::presentation::http::handlers::health;
use crate::presentation::http::routes;
use crate::presentation::websocket::{ChannelBroker, CloseReason, ConnectionRegistry};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub broker: Arc<ChannelBroker>,
    pub bus: Arc<dyn Bus>,
    pub token_service: Arc<TokenService>,
    pub identities: Arc<dyn IdentityStore>,
    pub oauth: Arc<dyn OAuthFlow>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with a Redis-backed bus.
    pub async fn build(
        settings: Settings,
        identities: Arc<dyn IdentityStore>,
        oauth: Arc<dyn OAuthFlow>,
    ) -> Result<Self> {
        let bus: Arc<dyn Bus> = Arc::new(
            RedisBus::connect(&settings.redis, settings.channel.bus_buffer_size).await?,
        );
        tracing::info!(url = %settings.redis.url, "Bus adapter connected");

        Self::build_with_bus(settings, identities, oauth, bus).await
    }

    /// Build the application around an existing bus adapter. Lets tests and
    /// single-node embedders run on the in-memory bus.
    pub async fn build_with_bus(
        settings: Settings,
        identities: Arc<dyn IdentityStore>,
        oauth: Arc<dyn OAuthFlow>,
        bus: Arc<dyn Bus>,
    ) -> Result<Self> {
        let node = NodeId::new(settings.node.id.clone());
        let registry = Arc::new(ConnectionRegistry::new(node.clone()));
        let token_service = Arc::new(TokenService::new(&settings.jwt));

        let broker = Arc::new(ChannelBroker::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            node.clone(),
            settings.channel.clone(),
        ));

        // Bus deliveries flow straight into the broker. Origin filtering
        // happens there.
        let handler_broker = Arc::clone(&broker);
        bus.set_handler(Arc::new(move |message| {
            handler_broker.on_bus_message(message);
        }));

        spawn_idle_sweep(Arc::clone(&registry), &settings);
        spawn_channel_sweep(Arc::clone(&broker), &settings);

        health::init_server_start();

        let state = AppState {
            registry,
            broker,
            bus,
            token_service,
            identities,
            oauth,
            settings: Arc::new(settings.clone()),
        };

        let router = routes::create_router(state);

        let addr = settings.server_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(node = %node, "Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Periodically evict connections that have gone silent. Eviction only
/// flips the close signal; each socket's task finishes its own teardown.
fn spawn_idle_sweep(registry: Arc<ConnectionRegistry>, settings: &Settings) {
    let timeout = Duration::from_secs(settings.websocket.idle_timeout_secs);
    let interval = Duration::from_secs(settings.websocket.sweep_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for conn in registry.idle_connections(timeout) {
                if conn.close(CloseReason::IdleTimeout) {
                    tracing::info!(connection_id = %conn.id, "idle connection evicted");
                }
            }
        }
    });
}

/// Periodically reap channels that have been empty past the grace period.
fn spawn_channel_sweep(broker: Arc<ChannelBroker>, settings: &Settings) {
    let interval = Duration::from_secs(settings.channel.gc_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            broker.sweep_empty_channels().await;
        }
    });
}
