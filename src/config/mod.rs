//! Configuration Module

mod settings;

pub use settings::{
    ChannelSettings, JwtSettings, NodeSettings, RedisSettings, ServerSettings, Settings,
    WebSocketSettings, MIN_JWT_SECRET_LENGTH,
};
