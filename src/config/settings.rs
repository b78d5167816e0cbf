//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Redis configuration (distributed bus backbone)
    pub redis: RedisSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Channel broker configuration
    pub channel: ChannelSettings,

    /// Node identity for cross-process routing
    pub node: NodeSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for signing tokens
    pub secret: String,

    /// Access token expiry in minutes
    pub access_token_expiry_minutes: i64,

    /// Refresh token expiry in days
    pub refresh_token_expiry_days: i64,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Timeout for the initial auth frame in seconds (default: 10)
    pub auth_timeout_secs: u64,

    /// Heartbeat interval advertised to clients in milliseconds (default: 30000)
    pub heartbeat_interval_ms: u64,

    /// Idle timeout before a silent connection is evicted, in seconds (default: 90)
    pub idle_timeout_secs: u64,

    /// Interval of the idle-eviction sweep in seconds (default: 15)
    pub sweep_interval_secs: u64,

    /// Per-connection outbound buffer capacity in frames (default: 256).
    /// A full buffer drops the connection rather than blocking fan-out.
    pub outbound_buffer_size: usize,
}

/// Channel broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Grace period before an empty channel's bus interest is dropped,
    /// in seconds (default: 30). Avoids bus churn on subscribe flapping.
    pub gc_grace_secs: u64,

    /// Interval of the empty-channel sweep in seconds (default: 10)
    pub gc_interval_secs: u64,

    /// Maximum subscriptions per connection (default: 128)
    pub max_subscriptions_per_connection: usize,

    /// Bounded buffer of bus publishes retained across bus outages
    /// (default: 1024, oldest dropped when full)
    pub bus_buffer_size: usize,
}

/// Node identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Stable identifier of this gateway process. Must differ between
    /// processes sharing one Redis backbone.
    pub id: String,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("jwt.access_token_expiry_minutes", 15)?
            .set_default("jwt.refresh_token_expiry_days", 7)?
            .set_default("websocket.auth_timeout_secs", 10)?
            .set_default("websocket.heartbeat_interval_ms", 30000_i64)?
            .set_default("websocket.idle_timeout_secs", 90)?
            .set_default("websocket.sweep_interval_secs", 15)?
            .set_default("websocket.outbound_buffer_size", 256)?
            .set_default("channel.gc_grace_secs", 30)?
            .set_default("channel.gc_interval_secs", 10)?
            .set_default("channel.max_subscriptions_per_connection", 128)?
            .set_default("channel.bus_buffer_size", 1024)?
            .set_default("node.id", "node-1")?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("node.id", std::env::var("NODE_ID").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // Validate JWT secret length for security
                if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
                    return Err(ConfigError::Message(format!(
                        "JWT secret must be at least {} characters for security. Current length: {}",
                        MIN_JWT_SECRET_LENGTH,
                        settings.jwt.secret.len()
                    )));
                }
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid server address configuration")
    }
}
