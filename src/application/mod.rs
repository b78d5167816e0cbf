//! Application Layer
//!
//! Services implementing gateway-side business logic.

pub mod services;
