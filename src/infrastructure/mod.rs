//! Infrastructure Layer
//!
//! Distributed bus adapters and observability plumbing.

pub mod bus;
pub mod metrics;
