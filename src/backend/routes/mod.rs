//! Route Configuration Module
//!
//! This module configures all HTTP routes for the backend server.
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs          - Module exports and documentation
//! ├── router.rs       - Main router creation, CORS and tracing layers
//! └── api_routes.rs   - Authenticated `/api` endpoints
//! ```
//!
//! # Route Types
//!
//! - `GET /health` - Liveness
//! - `GET /ws?workspaceId=&token=` - WebSocket upgrade
//! - `/api/...` - Message, reaction and read-state endpoints (bearer token)

/// Main router creation
pub mod router;

/// API endpoint handlers
pub mod api_routes;

pub use router::create_router;
