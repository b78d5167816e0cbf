//! Presentation Layer
//!
//! HTTP routes, middleware, and the WebSocket gateway surface.

pub mod http;
pub mod middleware;
pub mod websocket;
