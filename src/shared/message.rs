/**
 * Message View Structures
 *
 * This module defines `MessageView`, the wire shape of a chat message,
 * together with the nested views it is built from. Views are produced by the
 * backend output assembler and serialized as camelCase JSON both in HTTP
 * responses and in WebSocket payloads.
 *
 * Optional fields (`parentId`, `editedAt`, `deletedAt`, `deletedBy`,
 * `avatarUrl`, `lastReplyAt`) are always present on the wire as either a
 * value or `null`; they are never replaced by zero values.
 */
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name used when the author row cannot be found.
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Compact user reference embedded in messages and reactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserView {
    /// Placeholder for a user id with no matching row.
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            display_name: UNKNOWN_USER_NAME.to_string(),
            avatar_url: None,
        }
    }
}

/// A resolved `@user` mention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MentionView {
    pub user_id: Uuid,
    pub display_name: String,
}

/// A resolved `@group` mention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMentionView {
    pub group_id: Uuid,
    pub name: String,
}

/// Link preview attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkView {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub card_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub user: UserView,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Thread summary shown on a thread parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    pub reply_count: i32,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub last_reply_user_id: Option<Uuid>,
    pub participant_ids: Vec<Uuid>,
}

/// External representation of a channel message.
///
/// `is_deleted` mirrors `deleted_at.is_some()`. The body of a deleted
/// message is passed through untouched; masking is a presentation concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user: UserView,
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub mentions: Vec<MentionView>,
    pub groups: Vec<GroupMentionView>,
    pub links: Vec<LinkView>,
    pub reactions: Vec<ReactionView>,
    pub attachments: Vec<AttachmentView>,
    pub thread: Option<ThreadView>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserView>,
}

/// A server-generated timeline entry such as `member_joined`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessageView {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Response body for `GET /api/channels/{cid}/messages`.
///
/// One page of the channel timeline: user messages and system messages
/// together hold at most `limit` entries, each list newest first. The
/// oldest `createdAt` across both lists is the `until` of the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListView {
    pub messages: Vec<MessageView>,
    #[serde(default)]
    pub system_messages: Vec<SystemMessageView>,
    pub has_more: bool,
}

/// Response body for `GET /api/messages/{mid}/thread`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetailView {
    pub parent: MessageView,
    pub replies: Vec<MessageView>,
    pub metadata: ThreadView,
}

/// Request body for `POST /api/channels/{cid}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
}

/// Request body for `PATCH /api/messages/{mid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub body: String,
}

/// Request body for `POST /api/messages/{mid}/reactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReactionRequest {
    pub emoji: String,
}

/// Request body for `POST /api/channels/{cid}/reads`.
///
/// `lastReadAt` is an RFC3339 string, validated by the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReadStateRequest {
    pub last_read_at: String,
}

/// Response body for `POST /api/channels/{cid}/reads`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadStateView {
    pub channel_id: Uuid,
    pub last_read_at: DateTime<Utc>,
    pub unread_count: i64,
}

/// Response body for `GET /api/channels/{cid}/unread_count`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCountView {
    pub count: i64,
}

/// Response body for `GET /api/unread`: channels with at least one unread message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllUnreadView {
    pub channels: BTreeMap<Uuid, i64>,
}
