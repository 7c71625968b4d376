//! Teamchat - Real-time Messaging Core
//!
//! Teamchat is the messaging core of a team-chat backend. It accepts chat
//! writes over HTTP, fans them out to connected clients over a WebSocket, and
//! keeps derived state (threads, unread counts, mentions, link previews) in a
//! relational store under transactional guarantees.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire types shared between server and clients
//!   - `MessageView` and nested views, WebSocket frames
//!   - Validation helpers and shared error types
//!   - Application configuration
//!
//! - **`backend`** - Server-side code
//!   - Axum HTTP server and `/ws` endpoint
//!   - Repository ports with Postgres and in-memory stores
//!   - Message pipeline, channel access, read state
//!   - Fan-out hub and per-socket connection handler
//!
//! # Usage
//!
//! ```rust,no_run
//! use teamchat::backend::server::{create_app, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! let app = create_app(config).await;
//! // Serve `app` with axum::serve
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - HTTP handlers run in parallel on the tokio worker pool
//! - The hub owns its maps on a single task; everything else talks to it through queues
//! - Stores are `Send + Sync` and hand out one connection handle per unit of work

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
pub mod backend;
