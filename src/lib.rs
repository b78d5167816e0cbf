//! # Relay Gateway Library
//!
//! This crate provides a JWT-authenticated real-time messaging gateway with:
//! - WebSocket session handling with an explicit connection lifecycle
//! - Channel-based pub/sub fan-out with per-channel sequencing
//! - Redis-backed distributed bus for cross-process delivery
//! - Stateless JWT token issuance and verification
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Identities, messages, and collaborator traits
//! - **Application Layer**: Token service
//! - **Infrastructure Layer**: Distributed bus adapters and metrics
//! - **Presentation Layer**: HTTP routes and the WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! relay_gateway/
//! +-- config/        Configuration management
//! +-- domain/        Identities, messages, collaborator traits
//! +-- application/   Token service
//! +-- infrastructure/ Bus adapters (Redis, in-memory) and metrics
//! +-- presentation/  HTTP routes and WebSocket gateway
//! +-- shared/        Common utilities (errors, validation)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core types and collaborator seams
pub mod domain;

// Application layer - Services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
