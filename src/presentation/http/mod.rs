//! HTTP Surface
//!
//! Routes and handlers for auth, health, and metrics.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
