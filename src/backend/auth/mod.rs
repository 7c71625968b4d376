//! Authentication Module
//!
//! Bearer-token validation shared by the HTTP middleware and the socket
//! upgrade handler.
//!
//! # Module Structure
//!
//! ```text
//! auth/
//! ├── mod.rs          - Module exports and documentation
//! └── sessions.rs     - JWT claims, token verification, session check
//! ```
//!
//! # Security
//!
//! - Tokens are HS256 JWTs signed with `JWT_SECRET`
//! - A token naming a session is only accepted while that session is active
//! - A token whose user no longer exists is rejected

/// JWT token generation and validation
pub mod sessions;

pub use sessions::{authenticate, create_token, verify_token, AuthenticatedUser, Claims, TokenKeys};
