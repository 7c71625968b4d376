//! Backend Module
//!
//! This module contains all server-side code for the teamchat messaging core.
//!
//! # Overview
//!
//! The backend module includes:
//! - Axum HTTP server setup and configuration
//! - Bearer-token authentication with session checks
//! - The transactional message pipeline and its derived state
//! - Channel access decisions
//! - The fan-out hub and the `/ws` connection handler
//! - Repository ports with PostgreSQL and in-memory stores
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── main.rs         - Binary entry point
//! ├── server/         - Configuration, state and app creation
//! ├── routes/         - Route configuration
//! ├── middleware/     - Auth middleware and `AuthUser` extractor
//! ├── auth/           - JWT tokens and session validation
//! ├── error/          - BackendError and its HTTP mapping
//! ├── store/          - Repository ports, models, Postgres and memory stores
//! ├── access.rs       - Channel access service
//! ├── messaging/      - Pipeline, reactions, read state, mentions, links, threads
//! ├── realtime/       - Hub, connection handler, notifier
//! └── testing.rs      - Seeded fixtures for tests
//! ```
//!
//! # Thread Safety
//!
//! - Services are cheap clones sharing `Arc` dependencies
//! - The hub's maps are owned by its event loop task
//! - Each unit of work holds one store handle; transactions commit or roll back as a whole
//!
//! # Error Handling
//!
//! Use cases return `BackendResult<T>`. `BackendError` carries a stable code
//! and maps to an HTTP status in its `IntoResponse` impl.

/// Server setup and configuration
pub mod server;

/// Route configuration
pub mod routes;

/// Middleware for request processing
pub mod middleware;

/// Authentication
pub mod auth;

/// Backend error types
pub mod error;

/// Persistence ports and adapters
pub mod store;

/// Channel access decisions
pub mod access;

/// Messages and derived state
pub mod messaging;

/// Real-time update system
pub mod realtime;

/// Seeded fixtures for unit and integration tests
#[doc(hidden)]
pub mod testing;

pub use error::{BackendError, BackendResult};
pub use server::create_app;
