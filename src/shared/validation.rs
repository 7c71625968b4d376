//! Input validation shared by HTTP handlers and the socket protocol.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::shared::error::SharedError;

/// Upper bound on message body length in characters
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

static WORKSPACE_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("valid slug regex"));

/// Workspace ids are 3-12 char slugs of lowercase letters, digits and inner hyphens.
pub fn validate_workspace_id(id: &str) -> Result<(), SharedError> {
    if !(3..=12).contains(&id.len()) {
        return Err(SharedError::validation(
            "workspaceId",
            "must be between 3 and 12 characters",
        ));
    }
    if !WORKSPACE_SLUG.is_match(id) {
        return Err(SharedError::validation(
            "workspaceId",
            "must contain only lowercase letters, digits and inner hyphens",
        ));
    }
    Ok(())
}

/// Reject empty (or whitespace-only) and oversized bodies.
pub fn validate_body(body: &str) -> Result<(), SharedError> {
    if body.trim().is_empty() {
        return Err(SharedError::validation("body", "message body cannot be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(SharedError::validation(
            "body",
            format!("message body exceeds {} characters", MAX_MESSAGE_LENGTH),
        ));
    }
    Ok(())
}

/// Resolve an optional page limit, defaulting to 50 and rejecting values outside 1..=100.
pub fn resolve_limit(limit: Option<i64>) -> Result<i64, SharedError> {
    match limit {
        None => Ok(DEFAULT_PAGE_LIMIT),
        Some(l) if (1..=MAX_PAGE_LIMIT).contains(&l) => Ok(l),
        Some(_) => Err(SharedError::validation(
            "limit",
            format!("must be between 1 and {}", MAX_PAGE_LIMIT),
        )),
    }
}

pub fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, SharedError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SharedError::validation(field, "must be an RFC3339 timestamp"))
}

/// Emoji for reactions: non-empty, no whitespace, at most 64 bytes.
pub fn validate_emoji(emoji: &str) -> Result<(), SharedError> {
    if emoji.is_empty() || emoji.len() > 64 || emoji.chars().any(char::is_whitespace) {
        return Err(SharedError::validation("emoji", "invalid emoji"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_slugs() {
        assert!(validate_workspace_id("acme").is_ok());
        assert!(validate_workspace_id("a-1").is_ok());
        assert!(validate_workspace_id("abcdefghijkl").is_ok());

        assert!(validate_workspace_id("ab").is_err());
        assert!(validate_workspace_id("abcdefghijklm").is_err());
        assert!(validate_workspace_id("-abc").is_err());
        assert!(validate_workspace_id("abc-").is_err());
        assert!(validate_workspace_id("Acme").is_err());
        assert!(validate_workspace_id("ac_me").is_err());
    }

    #[test]
    fn test_body_validation() {
        assert!(validate_body("hello").is_ok());
        assert!(validate_body("").is_err());
        assert!(validate_body("   \n").is_err());
        assert!(validate_body(&"x".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(validate_body(&"x".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_limit_resolution() {
        assert_eq!(resolve_limit(None).unwrap(), 50);
        assert_eq!(resolve_limit(Some(1)).unwrap(), 1);
        assert_eq!(resolve_limit(Some(100)).unwrap(), 100);
        assert!(resolve_limit(Some(0)).is_err());
        assert!(resolve_limit(Some(101)).is_err());
    }

    #[test]
    fn test_rfc3339() {
        assert!(parse_rfc3339("since", "2024-01-01T00:00:00Z").is_ok());
        assert!(parse_rfc3339("since", "2024-01-01T00:00:00+02:00").is_ok());
        assert!(parse_rfc3339("since", "yesterday").is_err());
    }

    #[test]
    fn test_emoji() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji(":tada:").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("a b").is_err());
    }
}
