//! Server Module
//!
//! This module contains all server-side code for initializing and configuring
//! the Axum HTTP server.
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs          - Module exports and documentation
//! ├── state.rs        - AppState and FromRef implementations
//! ├── config.rs       - Environment configuration and database loading
//! └── init.rs         - Service wiring and app creation
//! ```
//!
//! # State Management
//!
//! `AppState` holds the store, the message pipeline, the read-state engine,
//! the hub handle, token keys and the validated `AppConfig`. Handlers pull
//! the piece they need through `State<T>` via `FromRef`.
//!
//! # Example
//!
//! ```rust,no_run
//! use teamchat::backend::server::{create_app, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = create_app(ServerConfig::from_env()?).await;
//! # Ok(())
//! # }
//! ```

/// Application state management
pub mod state;

/// Server configuration loading
pub mod config;

/// Server initialization
pub mod init;

pub use config::ServerConfig;
pub use init::{build_state, create_app};
pub use state::AppState;
