//! Shared Module
//!
//! Types shared between the HTTP API and the WebSocket protocol: the
//! external message representation, the frame envelopes, input validation
//! and configuration values that do not depend on the server runtime.
//!
//! # Overview
//!
//! Everything here is serializable and free of I/O, so it can be used by
//! both server code and test clients.

/// Message view structures
pub mod message;

/// Real-time frame envelopes
pub mod event;

/// Shared error types
pub mod error;

/// Input validation helpers
pub mod validation;

/// Application configuration
pub mod config;

pub use config::{AppConfig, AppConfigBuilder, ConfigError, RealtimeSettings};
pub use error::SharedError;
pub use event::{ClientFrame, ServerFrame};
pub use message::{MessageView, UserView};
