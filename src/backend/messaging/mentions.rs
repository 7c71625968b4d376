//! Mention Extractor
//!
//! Finds `@name` tokens in a message body and resolves each one within the
//! workspace: a unique member with that display name wins, then a unique
//! group with that name. Ambiguous or unknown names are dropped.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::backend::store::prelude::*;

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w])@([\w.\-]+)").expect("mention pattern is valid")
});

/// Mention targets resolved from one body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMentions {
    pub user_ids: Vec<Uuid>,
    pub group_ids: Vec<Uuid>,
}

impl ResolvedMentions {
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.group_ids.is_empty()
    }
}

/// Distinct `@name` tokens in order of first appearance, without the `@`
///
/// Names are Unicode words (`@José`, `@さくら`). An `@` glued to a preceding
/// word character (`bob@example.com`) is not a mention. Trailing dots are sentence punctuation, not part of the name.
pub fn extract_mention_tokens(body: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for caps in MENTION_RE.captures_iter(body) {
        let name = caps[1].trim_end_matches('.');
        if name.is_empty() || tokens.iter().any(|t| t == name) {
            continue;
        }
        tokens.push(name.to_string());
    }
    tokens
}

/// Resolve the mention tokens of `body` against `workspace_id`
pub async fn resolve_mentions(
    repos: &mut dyn Repos,
    workspace_id: &str,
    body: &str,
) -> Result<ResolvedMentions, StoreError> {
    let mut resolved = ResolvedMentions::default();

    for token in extract_mention_tokens(body) {
        let users = repos.find_members_by_display_name(workspace_id, &token).await?;
        if let [user] = users.as_slice() {
            if !resolved.user_ids.contains(&user.id) {
                resolved.user_ids.push(user.id);
            }
            continue;
        }

        let groups = repos.find_groups_by_name(workspace_id, &token).await?;
        if let [group] = groups.as_slice() {
            if !resolved.group_ids.contains(&group.id) {
                resolved.group_ids.push(group.id);
            }
            continue;
        }

        tracing::debug!(token = %token, matches = users.len(), "[Mentions] Unresolved mention dropped");
    }

    Ok(resolved)
}

/// Resolve and store the mentions of `body` for `message_id`
pub async fn write_mentions(
    repos: &mut dyn Repos,
    workspace_id: &str,
    message_id: Uuid,
    body: &str,
    at: DateTime<Utc>,
) -> Result<ResolvedMentions, StoreError> {
    let resolved = resolve_mentions(repos, workspace_id, body).await?;
    if !resolved.user_ids.is_empty() {
        repos.insert_user_mentions(message_id, &resolved.user_ids, at).await?;
    }
    if !resolved.group_ids.is_empty() {
        repos.insert_group_mentions(message_id, &resolved.group_ids, at).await?;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::store::models::WorkspaceRole;
    use crate::backend::testing::{Fixture, WORKSPACE_ID};
    use proptest::prelude::*;

    #[test]
    fn test_extract_tokens() {
        assert_eq!(extract_mention_tokens("hi @alice"), vec!["alice"]);
        assert_eq!(
            extract_mention_tokens("@alice and @bob.smith, then @alice again."),
            vec!["alice", "bob.smith"]
        );
        assert_eq!(extract_mention_tokens("thanks @carol."), vec!["carol"]);
        assert!(extract_mention_tokens("mail bob@example.com").is_empty());
        assert!(extract_mention_tokens("just an @ sign").is_empty());
        assert_eq!(extract_mention_tokens("(@dev-team)"), vec!["dev-team"]);
        assert_eq!(extract_mention_tokens("hi @José and @さくら"), vec!["José", "さくら"]);
        assert_eq!(extract_mention_tokens("@Zoë."), vec!["Zoë"]);
        assert!(extract_mention_tokens("josé@example.com").is_empty());
    }

    proptest! {
        #[test]
        fn prop_tokens_are_distinct_and_well_formed(body in "[ a-zéüさくら@.,!_-]{0,64}") {
            let tokens = extract_mention_tokens(&body);
            for (i, token) in tokens.iter().enumerate() {
                prop_assert!(!token.is_empty());
                prop_assert!(!token.ends_with('.'));
                prop_assert!(token.chars().all(|c| c.is_alphanumeric() || "_.-".contains(c)));
                prop_assert!(!tokens[..i].contains(token));
            }
        }

        #[test]
        fn prop_named_mention_is_found(name in "[a-zéさくら][a-z0-9_éさくら]{0,15}", prefix in "[ a-z]{0,10}") {
            let body = format!("{} @{} hello", prefix, name);
            prop_assert!(extract_mention_tokens(&body).contains(&name));
        }
    }

    #[tokio::test]
    async fn test_resolves_unique_member() {
        let fx = Fixture::new().await;
        let mut repos = fx.store.connect().await.unwrap();

        let resolved = resolve_mentions(repos.as_mut(), WORKSPACE_ID, "hi @alice").await.unwrap();
        assert_eq!(resolved.user_ids, vec![fx.alice.id]);
        assert!(resolved.group_ids.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_user_falls_back_to_group() {
        let fx = Fixture::new().await;
        fx.member("ops", WorkspaceRole::Member).await;
        fx.member("ops", WorkspaceRole::Member).await;
        let group = fx.group("ops").await;
        let mut repos = fx.store.connect().await.unwrap();

        let resolved = resolve_mentions(repos.as_mut(), WORKSPACE_ID, "ping @ops").await.unwrap();
        assert!(resolved.user_ids.is_empty());
        assert_eq!(resolved.group_ids, vec![group.id]);
    }

    #[tokio::test]
    async fn test_non_member_and_unknown_names_dropped() {
        let fx = Fixture::new().await;
        fx.user("mallory").await;
        let mut repos = fx.store.connect().await.unwrap();

        let resolved = resolve_mentions(repos.as_mut(), WORKSPACE_ID, "@mallory @nobody")
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }
}
