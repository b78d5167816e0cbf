//! WebSocket Gateway
//!
//! Connection registry, channel broker, and per-socket session handling.

pub mod broker;
pub mod frames;
pub mod handler;
pub mod registry;
pub mod session;

pub use broker::{BrokerError, ChannelBroker};
pub use frames::{ClientFrame, CloseReason, ServerFrame};
pub use handler::ws_handler;
pub use registry::{ConnectionRegistry, DeliverError, RegisteredConnection, RegistryError};
pub use session::{SessionPhase, SessionState};
