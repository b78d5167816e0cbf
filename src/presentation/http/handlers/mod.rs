//! HTTP Handlers

pub mod auth;
pub mod connections;
pub mod health;
