//! Store Module
//!
//! Repository ports and their two implementations.
//!
//! A [`Store`] hands out [`Repos`] handles. A handle from [`Store::begin`]
//! is bound to one database transaction: every repository method called on
//! it (or on a `&mut dyn Repos` borrowed from it) runs inside that
//! transaction, and nothing becomes visible until [`Repos::commit`].
//! Dropping an uncommitted transactional handle rolls it back. A handle
//! from [`Store::connect`] runs each call in autocommit mode on the base
//! connection.
//!
//! Absence is reported as `Ok(None)` (or an empty `Vec`); `Err` is reserved
//! for I/O failures and constraint violations.
//!
//! # Module Structure
//!
//! ```text
//! store/
//! ├── mod.rs       - Ports, StoreError
//! ├── models.rs    - Entity structs
//! ├── postgres.rs  - sqlx/Postgres implementation
//! └── memory.rs    - In-process implementation for tests and local runs
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use models::*;

/// Errors surfaced by repositories
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A unique constraint rejected the write
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A stored value could not be mapped back into a model
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unique(constraint: impl Into<String>) -> Self {
        Self::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Source of repository handles
#[async_trait]
pub trait Store: Send + Sync {
    /// Autocommit handle over the base connection
    async fn connect(&self) -> Result<Box<dyn Repos>, StoreError>;

    /// Handle bound to a fresh transaction
    async fn begin(&self) -> Result<Box<dyn Repos>, StoreError>;
}

/// Every repository, reachable through one handle
#[async_trait]
pub trait Repos:
    UserRepository
    + WorkspaceRepository
    + ChannelRepository
    + UserGroupRepository
    + MessageRepository
    + AttachmentRepository
    + MentionRepository
    + LinkRepository
    + ReactionRepository
    + ReadStateRepository
    + ThreadRepository
    + SessionRepository
    + SystemMessageRepository
    + Send
{
    /// Commit the transaction; a no-op for autocommit handles
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserRepository {
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;
    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_users(&mut self, ids: &[Uuid]) -> Result<Vec<User>, StoreError>;
    /// Members of `workspace_id` whose display name equals `display_name`
    async fn find_members_by_display_name(
        &mut self,
        workspace_id: &str,
        display_name: &str,
    ) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait WorkspaceRepository {
    async fn insert_workspace(&mut self, workspace: &Workspace) -> Result<(), StoreError>;
    async fn get_workspace(&mut self, id: &str) -> Result<Option<Workspace>, StoreError>;
    async fn add_workspace_member(&mut self, member: &WorkspaceMember) -> Result<(), StoreError>;
    async fn get_workspace_member(
        &mut self,
        workspace_id: &str,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceMember>, StoreError>;
}

#[async_trait]
pub trait ChannelRepository {
    async fn insert_channel(&mut self, channel: &Channel) -> Result<(), StoreError>;
    async fn get_channel(&mut self, id: Uuid) -> Result<Option<Channel>, StoreError>;
    async fn add_channel_member(&mut self, member: &ChannelMember) -> Result<(), StoreError>;
    async fn get_channel_member(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelMember>, StoreError>;
    /// Public channels of the user's workspaces plus private channels they belong to
    async fn list_accessible_channels(&mut self, user_id: Uuid) -> Result<Vec<Channel>, StoreError>;
}

#[async_trait]
pub trait UserGroupRepository {
    async fn insert_group(&mut self, group: &UserGroup) -> Result<(), StoreError>;
    async fn find_groups_by_name(
        &mut self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Vec<UserGroup>, StoreError>;
    async fn get_groups(&mut self, ids: &[Uuid]) -> Result<Vec<UserGroup>, StoreError>;
}

#[async_trait]
pub trait MessageRepository {
    async fn insert_message(&mut self, message: NewMessage) -> Result<Message, StoreError>;
    async fn get_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError>;
    /// Like `get_message`, but holds a row lock until the transaction ends
    async fn lock_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError>;
    async fn update_message_body(
        &mut self,
        id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Soft-delete every id in `ids`; returns the number of rows changed
    async fn soft_delete_messages(
        &mut self,
        ids: &[Uuid],
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    /// Ids of non-deleted replies to `parent_id`
    async fn list_reply_ids(&mut self, parent_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
    /// Non-deleted top-level messages, newest first
    async fn list_channel_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<Message>, StoreError>;
    /// Non-deleted replies, oldest first
    async fn list_replies(&mut self, parent_id: Uuid) -> Result<Vec<Message>, StoreError>;
    /// Non-deleted messages created strictly after `after` (all of them when `None`)
    async fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait AttachmentRepository {
    async fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StoreError>;
    async fn get_attachments(&mut self, ids: &[Uuid]) -> Result<Vec<Attachment>, StoreError>;
    /// Mark pending attachments as attached to `message_id`
    async fn bind_attachments(
        &mut self,
        ids: &[Uuid],
        message_id: Uuid,
        uploaded_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn list_message_attachments(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<Attachment>, StoreError>;
}

#[async_trait]
pub trait MentionRepository {
    /// Duplicate (message, user) pairs are ignored
    async fn insert_user_mentions(
        &mut self,
        message_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Duplicate (message, group) pairs are ignored
    async fn insert_group_mentions(
        &mut self,
        message_id: Uuid,
        group_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Remove both user and group mentions of a message
    async fn delete_mentions(&mut self, message_id: Uuid) -> Result<(), StoreError>;
    async fn list_user_mentions(&mut self, message_ids: &[Uuid]) -> Result<Vec<UserMention>, StoreError>;
    async fn list_group_mentions(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<GroupMention>, StoreError>;
}

#[async_trait]
pub trait LinkRepository {
    async fn find_preview_by_url(&mut self, url: &str) -> Result<Option<LinkPreview>, StoreError>;
    /// Insert a preview; when the URL already exists the stored row wins and is returned
    async fn upsert_preview(&mut self, preview: &LinkPreview) -> Result<LinkPreview, StoreError>;
    async fn attach_link(
        &mut self,
        message_id: Uuid,
        link_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Unlink all previews from a message; the shared preview rows stay
    async fn delete_message_links(&mut self, message_id: Uuid) -> Result<(), StoreError>;
    async fn list_message_links(&mut self, message_ids: &[Uuid]) -> Result<Vec<MessageLink>, StoreError>;
}

#[async_trait]
pub trait ReactionRepository {
    /// Fails with `UniqueViolation` when the triple exists
    async fn insert_reaction(&mut self, reaction: &Reaction) -> Result<(), StoreError>;
    async fn delete_reaction(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, StoreError>;
    /// Reactions ordered by creation time, oldest first
    async fn list_reactions(&mut self, message_ids: &[Uuid]) -> Result<Vec<Reaction>, StoreError>;
}

#[async_trait]
pub trait ReadStateRepository {
    async fn upsert_read_state(&mut self, state: &ChannelReadState) -> Result<(), StoreError>;
    async fn get_read_state(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelReadState>, StoreError>;
}

#[async_trait]
pub trait ThreadRepository {
    async fn get_thread_metadata(&mut self, message_id: Uuid) -> Result<Option<ThreadMetadata>, StoreError>;
    async fn list_thread_metadata(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ThreadMetadata>, StoreError>;
    async fn save_thread_metadata(&mut self, metadata: &ThreadMetadata) -> Result<(), StoreError>;
    async fn delete_thread_metadata(&mut self, message_id: Uuid) -> Result<(), StoreError>;
    /// Record that a user follows a thread; repeated calls are no-ops
    async fn follow_thread(
        &mut self,
        user_id: Uuid,
        thread_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn list_thread_followers(&mut self, thread_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait SystemMessageRepository {
    async fn insert_system_message(&mut self, message: &SystemMessage) -> Result<(), StoreError>;
    /// Entries of one channel within `range`, newest first
    async fn list_system_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<SystemMessage>, StoreError>;
}

#[async_trait]
pub trait SessionRepository {
    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError>;
    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError>;
}

/// Glob import for code that calls repository methods on a handle
pub mod prelude {
    pub use super::{
        AttachmentRepository, ChannelRepository, LinkRepository, MentionRepository,
        MessageRepository, ReactionRepository, ReadStateRepository, Repos, SessionRepository,
        Store, StoreError, SystemMessageRepository, ThreadRepository, UserGroupRepository,
        UserRepository, WorkspaceRepository,
    };
}
