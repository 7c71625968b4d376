//! Persisted entities
//!
//! Plain structs mirroring the relational rows. Optional columns are
//! `Option`s; none of them is ever stood in for by a zero value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::shared::error::SharedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
    Guest,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Guest => "guest",
        }
    }

    /// Owners and admins may edit or delete messages they did not write
    pub fn can_moderate(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl FromStr for WorkspaceRole {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "guest" => Ok(Self::Guest),
            other => Err(SharedError::validation(
                "role",
                format!("unknown workspace role '{}'", other),
            )),
        }
    }
}

impl fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Immutable slug
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub is_public: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceMember {
    pub workspace_id: String,
    pub user_id: Uuid,
    pub role: WorkspaceRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Admin,
    Member,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for ChannelRole {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(SharedError::validation(
                "role",
                format!("unknown channel role '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMember {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub role: ChannelRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGroup {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Insert payload; the store assigns `id` and `created_at`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub body: String,
    /// Taken from the application clock, like every other timestamp we write
    pub created_at: DateTime<Utc>,
}

/// Server-generated timeline event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemMessageKind {
    MemberJoined,
    MemberAdded,
    MemberLeft,
    MemberRemoved,
    ChannelRenamed,
    ChannelTopicChanged,
}

impl SystemMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberJoined => "member_joined",
            Self::MemberAdded => "member_added",
            Self::MemberLeft => "member_left",
            Self::MemberRemoved => "member_removed",
            Self::ChannelRenamed => "channel_renamed",
            Self::ChannelTopicChanged => "channel_topic_changed",
        }
    }
}

impl FromStr for SystemMessageKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member_joined" => Ok(Self::MemberJoined),
            "member_added" => Ok(Self::MemberAdded),
            "member_left" => Ok(Self::MemberLeft),
            "member_removed" => Ok(Self::MemberRemoved),
            "channel_renamed" => Ok(Self::ChannelRenamed),
            "channel_topic_changed" => Ok(Self::ChannelTopicChanged),
            other => Err(SharedError::validation(
                "kind",
                format!("unknown system message kind '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SystemMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeline entry written by the server, never edited or deleted
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub kind: SystemMessageKind,
    /// Kind-specific details, opaque to the core
    pub payload: serde_json::Value,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Exclusive time bounds and row limit for a timeline page
#[derive(Debug, Clone, Copy)]
pub struct MessageRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStatus {
    Pending,
    Attached,
    Expired,
}

impl AttachmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Attached => "attached",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for AttachmentStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "attached" => Ok(Self::Attached),
            "expired" => Ok(Self::Expired),
            other => Err(SharedError::validation(
                "status",
                format!("unknown attachment status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: Uuid,
    /// `None` while pending
    pub message_id: Option<Uuid>,
    pub uploader_id: Uuid,
    pub channel_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub status: AttachmentStatus,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMention {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMention {
    pub message_id: Uuid,
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Cached OGP data for one URL, shared by every message linking it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreview {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub card_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LinkPreview {
    /// Row with only the URL populated, used when OGP data is unavailable
    pub fn url_only(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: None,
            description: None,
            image_url: None,
            site_name: None,
            card_type: None,
            created_at: Utc::now(),
        }
    }
}

/// A preview as linked from a particular message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    pub message_id: Uuid,
    pub link: LinkPreview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReadState {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub last_read_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMetadata {
    pub message_id: Uuid,
    pub reply_count: i32,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub last_reply_user_id: Option<Uuid>,
    pub participant_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadMetadata {
    /// Zero-valued metadata for a message with no replies yet
    pub fn empty(message_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            message_id,
            reply_count: 0,
            last_reply_at: None,
            last_reply_user_id: None,
            participant_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Account for one more reply by `user_id` at `at`
    pub fn record_reply(&mut self, user_id: Uuid, at: DateTime<Utc>) {
        self.reply_count += 1;
        self.last_reply_at = Some(at);
        self.last_reply_user_id = Some(user_id);
        if !self.participant_ids.contains(&user_id) {
            self.participant_ids.push(user_id);
        }
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}
