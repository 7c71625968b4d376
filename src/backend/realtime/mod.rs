//! Real-time Update Module
//!
//! Live delivery of message events over WebSockets.
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs          - Module exports and documentation
//! ├── hub.rs          - Fan-out hub state machine and its event loop
//! ├── connection.rs   - `/ws` upgrade, read and write pumps, frame dispatch
//! └── notifier.rs     - Notifier port used by the message pipeline
//! ```
//!
//! # Flow
//!
//! A use case commits, then calls its [`Notifier`]. [`HubNotifier`] encodes
//! the frame once and queues a broadcast on the hub. The hub loop enqueues
//! the payload to every subscribed client without waiting; each connection's
//! write pump drains its own queue onto the socket.
//!
//! Delivery is best-effort. Nothing is persisted or replayed; a reconnecting
//! client catches up over HTTP.

/// Fan-out hub
pub mod hub;

/// Per-socket connection handler
pub mod connection;

/// Notification adapter between the pipeline and the hub
pub mod notifier;

pub use connection::ws_handler;
pub use hub::HubHandle;
pub use notifier::{HubNotifier, Notifier};
