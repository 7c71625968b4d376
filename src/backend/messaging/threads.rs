//! Thread Manager
//!
//! Maintains `ThreadMetadata`, the derived reply summary of a thread parent.
//! Reply deletion does not decrement the count; the summary is a hint.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::store::models::ThreadMetadata;
use crate::backend::store::prelude::*;

/// Account for a new reply by `reply_user_id` under `parent_id`
///
/// Locks the parent row first so concurrent replies serialize on it. The
/// replier and the parent's author both follow the thread afterwards.
pub async fn increment_reply_count(
    repos: &mut dyn Repos,
    parent_id: Uuid,
    reply_user_id: Uuid,
    at: DateTime<Utc>,
) -> Result<ThreadMetadata, StoreError> {
    let parent = repos.lock_message(parent_id).await?;

    let mut metadata = repos
        .get_thread_metadata(parent_id)
        .await?
        .unwrap_or_else(|| ThreadMetadata::empty(parent_id, at));
    metadata.record_reply(reply_user_id, at);
    repos.save_thread_metadata(&metadata).await?;

    repos.follow_thread(reply_user_id, parent_id, at).await?;
    if let Some(parent) = parent {
        if parent.user_id != reply_user_id {
            repos.follow_thread(parent.user_id, parent_id, at).await?;
        }
    }

    tracing::debug!(
        parent_id = %parent_id,
        reply_count = metadata.reply_count,
        "[Threads] Reply recorded"
    );
    Ok(metadata)
}

/// Thread summary of `message_id`; a zero-valued summary when nothing is stored
pub async fn get_metadata(
    repos: &mut dyn Repos,
    message_id: Uuid,
) -> Result<ThreadMetadata, StoreError> {
    Ok(repos
        .get_thread_metadata(message_id)
        .await?
        .unwrap_or_else(|| ThreadMetadata::empty(message_id, Utc::now())))
}

pub async fn delete_metadata(repos: &mut dyn Repos, parent_id: Uuid) -> Result<(), StoreError> {
    repos.delete_thread_metadata(parent_id).await
}
