//! Channel access decisions
//!
//! Every read or write against a channel goes through [`ensure_access`]:
//! public channels admit workspace members, private channels admit channel
//! members only. Workspace owners and admins get no read bypass; their extra
//! power is limited to editing and deleting other people's messages
//! ([`ensure_can_modify`]).

use uuid::Uuid;

use crate::backend::error::BackendError;
use crate::backend::store::models::{Channel, Message, WorkspaceMember};
use crate::backend::store::prelude::*;

/// Load the channel and check that `user_id` may read and write it
pub async fn ensure_access(
    repos: &mut dyn Repos,
    channel_id: Uuid,
    user_id: Uuid,
) -> Result<Channel, BackendError> {
    let channel = repos
        .get_channel(channel_id)
        .await?
        .ok_or_else(BackendError::channel_not_found)?;

    if channel.is_private {
        if repos.get_channel_member(channel.id, user_id).await?.is_none() {
            tracing::debug!(channel_id = %channel.id, user_id = %user_id, "[Access] Not a channel member");
            return Err(BackendError::not_channel_member());
        }
    } else if repos
        .get_workspace_member(&channel.workspace_id, user_id)
        .await?
        .is_none()
    {
        tracing::debug!(channel_id = %channel.id, user_id = %user_id, "[Access] Not a workspace member");
        return Err(BackendError::not_workspace_member());
    }

    Ok(channel)
}

/// Membership row for `user_id` in `workspace_id`, or `Forbidden`
pub async fn ensure_workspace_member(
    repos: &mut dyn Repos,
    workspace_id: &str,
    user_id: Uuid,
) -> Result<WorkspaceMember, BackendError> {
    repos
        .get_workspace_member(workspace_id, user_id)
        .await?
        .ok_or_else(BackendError::not_workspace_member)
}

/// Authors may modify their own messages; workspace owners and admins may modify any
pub async fn ensure_can_modify(
    repos: &mut dyn Repos,
    channel: &Channel,
    message: &Message,
    actor_id: Uuid,
) -> Result<(), BackendError> {
    if message.user_id == actor_id {
        return Ok(());
    }
    let moderator = repos
        .get_workspace_member(&channel.workspace_id, actor_id)
        .await?
        .is_some_and(|m| m.role.can_moderate());
    if moderator {
        Ok(())
    } else {
        Err(BackendError::not_message_owner())
    }
}
