//! # Relay Gateway
//!
//! A distributed WebSocket messaging gateway.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Redis bus adapter
//! - HTTP/WebSocket server

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use relay_gateway::config::Settings;
use relay_gateway::domain::{InMemoryIdentityStore, InMemoryOAuthFlow};
use relay_gateway::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    relay_gateway::telemetry::init_tracing();

    info!("Starting Relay Gateway...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        node = %settings.node.id,
        environment = %settings.environment,
        "Configuration loaded"
    );

    // Identity collaborators. Production deployments wire real
    // implementations here; the in-memory ones serve standalone runs.
    let identities = Arc::new(InMemoryIdentityStore::new());
    let oauth = Arc::new(InMemoryOAuthFlow::new());

    // Build and run the application
    let application = Application::build(settings, identities, oauth).await?;

    info!("Gateway ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
