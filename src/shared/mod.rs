//! Shared Utilities
//!
//! Common error types and validation helpers used across layers.

pub mod error;
pub mod validation;
