//! Messaging Module
//!
//! Channel messages and everything derived from them.
//!
//! # Module Structure
//!
//! ```text
//! messaging/
//! ├── mod.rs          - Module exports and documentation
//! ├── pipeline.rs     - Create, update, delete, list and thread reads
//! ├── reactions.rs    - Add and remove reactions
//! ├── read_state.rs   - Read watermarks and unread counts
//! ├── assembler.rs    - Batched view assembly
//! ├── mentions.rs     - `@name` extraction and resolution
//! ├── links.rs        - URL extraction, link previews, OGP port
//! ├── threads.rs      - Reply counters and followers
//! └── handlers.rs     - HTTP handlers
//! ```

pub mod assembler;
pub mod handlers;
pub mod links;
pub mod mentions;
pub mod pipeline;
pub mod reactions;
pub mod read_state;
pub mod threads;

pub use links::{HttpOgpFetcher, NoopOgpFetcher, OgpFetcher};
pub use pipeline::{CreateMessage, ListQuery, MessagePipeline};
pub use read_state::ReadStateEngine;
