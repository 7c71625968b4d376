/**
 * Backend Error Types
 *
 * This module defines the error taxonomy used by every use case and HTTP
 * handler. Each variant is one error kind; each carries a stable
 * machine-readable code and a human-readable message.
 *
 * # Error Kinds
 *
 * - `NotFound` - target entity absent (message, channel, parent, ...)
 * - `Forbidden` - authenticated but not permitted
 * - `Unauthenticated` - missing, invalid or expired credentials
 * - `Validation` - malformed input
 * - `Conflict` - uniqueness violation
 * - `Precondition` - the entity's state disallows the operation
 * - `Internal` - anything unexpected; the cause is logged, never returned
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::store::StoreError;
use crate::shared::SharedError;

/// Backend error taxonomy
///
/// # Usage
///
/// ```rust
/// use teamchat::backend::error::BackendError;
///
/// let err = BackendError::channel_not_found();
/// assert_eq!(err.code(), "channel_not_found");
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{message}")]
    Unauthenticated { code: &'static str, message: String },

    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("{message}")]
    Precondition { code: &'static str, message: String },

    /// `cause` is for logs only
    #[error("internal error: {cause}")]
    Internal { cause: String },
}

impl BackendError {
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            code: "unauthenticated",
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: "validation_error",
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::Precondition {
            code,
            message: message.into(),
        }
    }

    pub fn internal(cause: impl Into<String>) -> Self {
        Self::Internal { cause: cause.into() }
    }

    // Not-found

    pub fn channel_not_found() -> Self {
        Self::not_found("channel_not_found", "channel not found")
    }

    pub fn message_not_found() -> Self {
        Self::not_found("message_not_found", "message not found")
    }

    pub fn parent_message_not_found() -> Self {
        Self::not_found("parent_message_not_found", "parent message not found")
    }

    pub fn workspace_not_found() -> Self {
        Self::not_found("workspace_not_found", "workspace not found")
    }

    pub fn attachment_not_found() -> Self {
        Self::not_found("attachment_not_found", "attachment not found")
    }

    pub fn reaction_not_found() -> Self {
        Self::not_found("reaction_not_found", "reaction not found")
    }

    // Forbidden

    pub fn not_workspace_member() -> Self {
        Self::forbidden("not_workspace_member", "you are not a member of this workspace")
    }

    pub fn not_channel_member() -> Self {
        Self::forbidden("not_channel_member", "you are not a member of this channel")
    }

    pub fn not_message_owner() -> Self {
        Self::forbidden(
            "not_message_owner",
            "only the author or a workspace admin can modify this message",
        )
    }

    pub fn channel_not_joined() -> Self {
        Self::forbidden("channel_not_joined", "join the channel first")
    }

    // Unauthenticated

    pub fn invalid_token() -> Self {
        Self::unauthenticated("invalid or expired token")
    }

    pub fn session_invalid() -> Self {
        Self::Unauthenticated {
            code: "session_invalid",
            message: "session is revoked, expired or unknown".to_string(),
        }
    }

    // Validation

    pub fn invalid_attachment(message: impl Into<String>) -> Self {
        Self::Validation {
            code: "invalid_attachment",
            message: message.into(),
        }
    }

    // Conflict

    pub fn reaction_exists() -> Self {
        Self::conflict("reaction_exists", "you already reacted with this emoji")
    }

    // Precondition

    pub fn message_already_deleted() -> Self {
        Self::precondition("message_already_deleted", "message is already deleted")
    }

    pub fn cannot_edit_deleted() -> Self {
        Self::precondition("cannot_edit_deleted", "deleted messages cannot be edited")
    }

    pub fn message_deleted() -> Self {
        Self::precondition("message_deleted", "message has been deleted")
    }

    /// Get the HTTP status code for this error
    ///
    /// # Status Code Mapping
    ///
    /// - `NotFound` - 404
    /// - `Forbidden` - 403
    /// - `Unauthenticated` - 401
    /// - `Validation` - 400
    /// - `Conflict` - 409
    /// - `Precondition` - 422
    /// - `Internal` - 500
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Precondition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { code, .. }
            | Self::Forbidden { code, .. }
            | Self::Unauthenticated { code, .. }
            | Self::Validation { code, .. }
            | Self::Conflict { code, .. }
            | Self::Precondition { code, .. } => *code,
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Message safe to show to clients
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<SharedError> for BackendError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::ValidationError { field, message } => {
                Self::validation(format!("{}: {}", field, message))
            }
            SharedError::SerializationError { message } => Self::validation(message),
        }
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } => {
                tracing::debug!(constraint = %constraint, "[Store] Unique constraint violated");
                Self::conflict("conflict", "resource already exists")
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {}", err))
    }
}
