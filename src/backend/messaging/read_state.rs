//! Read-State Engine
//!
//! Per-user, per-channel read watermarks and the unread counts derived from
//! them. A message is unread when it is not deleted and was created strictly
//! after the watermark; a user with no watermark has every message unread.
//! The client's timestamp is stored as given, forward or backward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::access::ensure_access;
use crate::backend::error::BackendResult;
use crate::backend::realtime::notifier::Notifier;
use crate::backend::store::models::ChannelReadState;
use crate::backend::store::prelude::*;
use crate::shared::message::{AllUnreadView, ReadStateView};

#[derive(Clone)]
pub struct ReadStateEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl ReadStateEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Store the watermark, then push the new unread count to the user's sessions
    pub async fn update_read_state(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        last_read_at: DateTime<Utc>,
    ) -> BackendResult<ReadStateView> {
        let mut tx = self.store.begin().await?;
        let channel = ensure_access(tx.as_mut(), channel_id, user_id).await?;

        tx.upsert_read_state(&ChannelReadState {
            channel_id: channel.id,
            user_id,
            last_read_at,
            updated_at: Utc::now(),
        })
        .await?;
        let unread_count = tx.count_messages_after(channel.id, Some(last_read_at)).await?;
        tx.commit().await?;

        tracing::debug!(
            channel_id = %channel.id,
            user_id = %user_id,
            unread_count,
            "[ReadState] Watermark updated"
        );
        self.notifier
            .notify_unread_count(&channel.workspace_id, user_id, channel.id, unread_count)
            .await;

        Ok(ReadStateView {
            channel_id: channel.id,
            last_read_at,
            unread_count,
        })
    }

    pub async fn get_unread_count(&self, channel_id: Uuid, user_id: Uuid) -> BackendResult<i64> {
        let mut repos = self.store.connect().await?;
        let channel = ensure_access(repos.as_mut(), channel_id, user_id).await?;
        Ok(unread_count(repos.as_mut(), channel.id, user_id).await?)
    }

    /// Unread counts for every channel the user can see, zero entries omitted
    pub async fn get_all_unread(&self, user_id: Uuid) -> BackendResult<AllUnreadView> {
        let mut repos = self.store.connect().await?;
        let mut view = AllUnreadView::default();
        for channel in repos.list_accessible_channels(user_id).await? {
            let count = unread_count(repos.as_mut(), channel.id, user_id).await?;
            if count > 0 {
                view.channels.insert(channel.id, count);
            }
        }
        Ok(view)
    }
}

async fn unread_count(repos: &mut dyn Repos, channel_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
    let watermark = repos
        .get_read_state(channel_id, user_id)
        .await?
        .map(|state| state.last_read_at);
    repos.count_messages_after(channel_id, watermark).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::realtime::notifier::RecordingNotifier;
    use crate::backend::testing::Fixture;
    use crate::shared::event::ServerFrame;
    use chrono::Duration;

    fn engine(fx: &Fixture) -> (ReadStateEngine, RecordingNotifier) {
        let notifier = RecordingNotifier::new();
        (ReadStateEngine::new(fx.store(), Arc::new(notifier.clone())), notifier)
    }

    #[tokio::test]
    async fn test_no_watermark_means_everything_unread() {
        let fx = Fixture::new().await;
        let (engine, _) = engine(&fx);
        fx.post(fx.alice.id, "one").await;
        fx.post(fx.alice.id, "two").await;

        assert_eq!(engine.get_unread_count(fx.general.id, fx.bob.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unread_excludes_deleted_and_older() {
        let fx = Fixture::new().await;
        let (engine, notifier) = engine(&fx);
        fx.post(fx.alice.id, "before").await;

        let t0 = Utc::now();
        let view = engine.update_read_state(fx.general.id, fx.bob.id, t0).await.unwrap();
        assert_eq!(view.unread_count, 0);

        fx.post(fx.alice.id, "one").await;
        fx.post(fx.alice.id, "two").await;
        let doomed = fx.post(fx.alice.id, "three").await;
        {
            let mut repos = fx.store.connect().await.unwrap();
            repos
                .soft_delete_messages(&[doomed.id], fx.alice.id, Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(engine.get_unread_count(fx.general.id, fx.bob.id).await.unwrap(), 2);

        let pushed = notifier.notifications();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].user_id, Some(fx.bob.id));
        assert!(matches!(&pushed[0].frame, ServerFrame::UnreadCount(e) if e.count == 0));
    }

    #[tokio::test]
    async fn test_backward_watermark_is_stored() {
        let fx = Fixture::new().await;
        let (engine, _) = engine(&fx);
        fx.post(fx.alice.id, "one").await;

        engine
            .update_read_state(fx.general.id, fx.bob.id, Utc::now())
            .await
            .unwrap();
        let earlier = Utc::now() - Duration::hours(1);
        let view = engine
            .update_read_state(fx.general.id, fx.bob.id, earlier)
            .await
            .unwrap();
        assert_eq!(view.last_read_at, earlier);
        assert_eq!(view.unread_count, 1);
    }

    #[tokio::test]
    async fn test_private_channel_requires_membership() {
        let fx = Fixture::new().await;
        let (engine, notifier) = engine(&fx);
        let secret = fx.private_channel("secret", &[fx.alice.id]).await;

        let err = engine
            .update_read_state(secret.id, fx.bob.id, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_channel_member");
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_all_unread_lists_visible_nonzero_channels() {
        let fx = Fixture::new().await;
        let (engine, _) = engine(&fx);
        let secret = fx.private_channel("secret", &[fx.alice.id]).await;
        let quiet = fx.private_channel("quiet", &[fx.bob.id]).await;
        fx.post(fx.alice.id, "general news").await;
        {
            let mut repos = fx.store.connect().await.unwrap();
            repos
                .insert_message(crate::backend::store::models::NewMessage {
                    channel_id: secret.id,
                    user_id: fx.alice.id,
                    parent_id: None,
                    body: "secret news".to_string(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let bob = engine.get_all_unread(fx.bob.id).await.unwrap();
        assert_eq!(bob.channels.len(), 1);
        assert_eq!(bob.channels.get(&fx.general.id), Some(&1));
        assert!(!bob.channels.contains_key(&quiet.id));

        let alice = engine.get_all_unread(fx.alice.id).await.unwrap();
        assert_eq!(alice.channels.get(&secret.id), Some(&1));
    }
}
