//! Reactions
//!
//! Adding or removing a reaction re-renders the message and fans it out as
//! `message_updated`.

use chrono::Utc;
use uuid::Uuid;

use crate::backend::access::ensure_access;
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::messaging::assembler::assemble_one;
use crate::backend::messaging::pipeline::MessagePipeline;
use crate::backend::store::models::Reaction;
use crate::backend::store::prelude::*;
use crate::shared::message::MessageView;
use crate::shared::validation::validate_emoji;

impl MessagePipeline {
    pub async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> BackendResult<MessageView> {
        validate_emoji(emoji)?;
        self.change_reaction(message_id, user_id, emoji, ReactionChange::Add).await
    }

    pub async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> BackendResult<MessageView> {
        self.change_reaction(message_id, user_id, emoji, ReactionChange::Remove).await
    }

    async fn change_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        change: ReactionChange,
    ) -> BackendResult<MessageView> {
        let mut tx = self.store.begin().await?;
        let message = tx
            .get_message(message_id)
            .await?
            .ok_or_else(BackendError::message_not_found)?;
        let channel = ensure_access(tx.as_mut(), message.channel_id, user_id).await?;
        if message.is_deleted() {
            return Err(BackendError::message_deleted());
        }

        match change {
            ReactionChange::Add => {
                let reaction = Reaction {
                    message_id: message.id,
                    user_id,
                    emoji: emoji.to_string(),
                    created_at: Utc::now(),
                };
                match tx.insert_reaction(&reaction).await {
                    Err(e) if e.is_unique_violation() => return Err(BackendError::reaction_exists()),
                    other => other?,
                }
            }
            ReactionChange::Remove => {
                if !tx.delete_reaction(message.id, user_id, emoji).await? {
                    return Err(BackendError::reaction_not_found());
                }
            }
        }

        let view = assemble_one(tx.as_mut(), &message).await?;
        tx.commit().await?;

        tracing::debug!(
            message_id = %message.id,
            user_id = %user_id,
            emoji = %emoji,
            change = ?change,
            "[Reactions] Reaction changed"
        );
        self.notifier
            .notify_updated(&channel.workspace_id, channel.id, &view)
            .await;
        Ok(view)
    }
}

#[derive(Debug, Clone, Copy)]
enum ReactionChange {
    Add,
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::messaging::links::NoopOgpFetcher;
    use crate::backend::realtime::notifier::RecordingNotifier;
    use crate::backend::testing::Fixture;
    use std::sync::Arc;

    fn pipeline(fx: &Fixture) -> (MessagePipeline, RecordingNotifier) {
        let notifier = RecordingNotifier::new();
        let pipeline = MessagePipeline::new(fx.store(), Arc::new(notifier.clone()), Arc::new(NoopOgpFetcher));
        (pipeline, notifier)
    }

    #[tokio::test]
    async fn test_add_and_remove_reaction() {
        let fx = Fixture::new().await;
        let (pipeline, notifier) = pipeline(&fx);
        let message = fx.post(fx.alice.id, "ship it").await;

        let view = pipeline.add_reaction(message.id, fx.bob.id, "rocket").await.unwrap();
        assert_eq!(view.reactions.len(), 1);
        assert_eq!(view.reactions[0].user.id, fx.bob.id);
        assert_eq!(view.reactions[0].user.display_name, "bob");
        assert_eq!(view.reactions[0].emoji, "rocket");

        let view = pipeline.remove_reaction(message.id, fx.bob.id, "rocket").await.unwrap();
        assert!(view.reactions.is_empty());
        assert_eq!(notifier.kinds(), vec!["message_updated", "message_updated"]);
    }

    #[tokio::test]
    async fn test_duplicate_reaction_conflicts() {
        let fx = Fixture::new().await;
        let (pipeline, notifier) = pipeline(&fx);
        let message = fx.post(fx.alice.id, "ship it").await;

        pipeline.add_reaction(message.id, fx.bob.id, "rocket").await.unwrap();
        let err = pipeline.add_reaction(message.id, fx.bob.id, "rocket").await.unwrap_err();
        assert_eq!(err.code(), "reaction_exists");
        assert_eq!(notifier.kinds().len(), 1);

        // Same emoji from someone else is fine
        let view = pipeline.add_reaction(message.id, fx.carol.id, "rocket").await.unwrap();
        assert_eq!(view.reactions.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_missing_reaction() {
        let fx = Fixture::new().await;
        let (pipeline, _) = pipeline(&fx);
        let message = fx.post(fx.alice.id, "hello").await;

        let err = pipeline.remove_reaction(message.id, fx.bob.id, "wave").await.unwrap_err();
        assert_eq!(err.code(), "reaction_not_found");
    }

    #[tokio::test]
    async fn test_reaction_on_deleted_message() {
        let fx = Fixture::new().await;
        let (pipeline, _) = pipeline(&fx);
        let message = fx.post(fx.alice.id, "gone").await;
        pipeline.delete(message.id, fx.alice.id).await.unwrap();

        let err = pipeline.add_reaction(message.id, fx.bob.id, "wave").await.unwrap_err();
        assert_eq!(err.code(), "message_deleted");
    }

    #[tokio::test]
    async fn test_reaction_requires_access() {
        let fx = Fixture::new().await;
        let (pipeline, _) = pipeline(&fx);
        let outsider = fx.user("mallory").await;
        let message = fx.post(fx.alice.id, "hello").await;

        let err = pipeline.add_reaction(message.id, outsider.id, "wave").await.unwrap_err();
        assert_eq!(err.code(), "not_workspace_member");
    }
}
