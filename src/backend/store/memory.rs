//! In-process store
//!
//! Keeps every table in a `MemState` behind an async mutex. A handle owns
//! the lock for its whole lifetime, so handles are serialised. Transactional
//! handles work on a copy of the state that replaces the shared state on
//! commit; dropping the handle discards the copy.
//!
//! Callers must not hold two handles from the same store at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::*;
use super::*;

#[derive(Debug, Default, Clone)]
struct MemState {
    users: HashMap<Uuid, User>,
    workspaces: HashMap<String, Workspace>,
    workspace_members: HashMap<(String, Uuid), WorkspaceMember>,
    channels: HashMap<Uuid, Channel>,
    channel_members: HashMap<(Uuid, Uuid), ChannelMember>,
    groups: HashMap<Uuid, UserGroup>,
    messages: HashMap<Uuid, Message>,
    system_messages: HashMap<Uuid, SystemMessage>,
    attachments: HashMap<Uuid, Attachment>,
    user_mentions: Vec<UserMention>,
    group_mentions: Vec<GroupMention>,
    link_previews: HashMap<Uuid, LinkPreview>,
    /// (message_id, link_id, created_at)
    message_links: Vec<(Uuid, Uuid, DateTime<Utc>)>,
    reactions: Vec<Reaction>,
    read_states: HashMap<(Uuid, Uuid), ChannelReadState>,
    thread_metadata: HashMap<Uuid, ThreadMetadata>,
    thread_follows: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    sessions: HashMap<Uuid, Session>,
}

/// Store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn Repos>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemRepos {
            guard,
            working: None,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Repos>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = Some(guard.clone());
        Ok(Box::new(MemRepos { guard, working }))
    }
}

struct MemRepos {
    guard: OwnedMutexGuard<MemState>,
    /// Uncommitted copy for transactional handles
    working: Option<MemState>,
}

impl MemRepos {
    fn state(&mut self) -> &mut MemState {
        match self.working {
            Some(ref mut working) => working,
            None => &mut *self.guard,
        }
    }
}

#[async_trait]
impl Repos for MemRepos {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemRepos { mut guard, working } = *self;
        if let Some(working) = working {
            *guard = working;
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemRepos {
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        let state = self.state();
        if state.users.contains_key(&user.id) {
            return Err(StoreError::unique("users_pkey"));
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::unique("users_email_key"));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn get_users(&mut self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        let state = self.state();
        Ok(unique(ids)
            .filter_map(|id| state.users.get(&id).cloned())
            .collect())
    }

    async fn find_members_by_display_name(
        &mut self,
        workspace_id: &str,
        display_name: &str,
    ) -> Result<Vec<User>, StoreError> {
        let state = self.state();
        Ok(state
            .workspace_members
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter_map(|m| state.users.get(&m.user_id))
            .filter(|u| u.display_name == display_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkspaceRepository for MemRepos {
    async fn insert_workspace(&mut self, workspace: &Workspace) -> Result<(), StoreError> {
        let state = self.state();
        if state.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::unique("workspaces_pkey"));
        }
        state.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn get_workspace(&mut self, id: &str) -> Result<Option<Workspace>, StoreError> {
        Ok(self.state().workspaces.get(id).cloned())
    }

    async fn add_workspace_member(&mut self, member: &WorkspaceMember) -> Result<(), StoreError> {
        let key = (member.workspace_id.clone(), member.user_id);
        let state = self.state();
        if state.workspace_members.contains_key(&key) {
            return Err(StoreError::unique("workspace_members_pkey"));
        }
        state.workspace_members.insert(key, member.clone());
        Ok(())
    }

    async fn get_workspace_member(
        &mut self,
        workspace_id: &str,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceMember>, StoreError> {
        Ok(self
            .state()
            .workspace_members
            .get(&(workspace_id.to_string(), user_id))
            .cloned())
    }
}

#[async_trait]
impl ChannelRepository for MemRepos {
    async fn insert_channel(&mut self, channel: &Channel) -> Result<(), StoreError> {
        let state = self.state();
        if state
            .channels
            .values()
            .any(|c| c.workspace_id == channel.workspace_id && c.name == channel.name)
        {
            return Err(StoreError::unique("channels_workspace_id_name_key"));
        }
        state.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn get_channel(&mut self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        Ok(self.state().channels.get(&id).cloned())
    }

    async fn add_channel_member(&mut self, member: &ChannelMember) -> Result<(), StoreError> {
        let key = (member.channel_id, member.user_id);
        let state = self.state();
        if state.channel_members.contains_key(&key) {
            return Err(StoreError::unique("channel_members_pkey"));
        }
        state.channel_members.insert(key, member.clone());
        Ok(())
    }

    async fn get_channel_member(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelMember>, StoreError> {
        Ok(self.state().channel_members.get(&(channel_id, user_id)).cloned())
    }

    async fn list_accessible_channels(&mut self, user_id: Uuid) -> Result<Vec<Channel>, StoreError> {
        let state = self.state();
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|c| {
                if c.is_private {
                    state.channel_members.contains_key(&(c.id, user_id))
                } else {
                    state
                        .workspace_members
                        .contains_key(&(c.workspace_id.clone(), user_id))
                }
            })
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }
}

#[async_trait]
impl UserGroupRepository for MemRepos {
    async fn insert_group(&mut self, group: &UserGroup) -> Result<(), StoreError> {
        let state = self.state();
        if state
            .groups
            .values()
            .any(|g| g.workspace_id == group.workspace_id && g.name == group.name)
        {
            return Err(StoreError::unique("user_groups_workspace_id_name_key"));
        }
        state.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn find_groups_by_name(
        &mut self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Vec<UserGroup>, StoreError> {
        Ok(self
            .state()
            .groups
            .values()
            .filter(|g| g.workspace_id == workspace_id && g.name == name)
            .cloned()
            .collect())
    }

    async fn get_groups(&mut self, ids: &[Uuid]) -> Result<Vec<UserGroup>, StoreError> {
        let state = self.state();
        Ok(unique(ids)
            .filter_map(|id| state.groups.get(&id).cloned())
            .collect())
    }
}

#[async_trait]
impl MessageRepository for MemRepos {
    async fn insert_message(&mut self, message: NewMessage) -> Result<Message, StoreError> {
        let row = Message {
            id: Uuid::new_v4(),
            channel_id: message.channel_id,
            user_id: message.user_id,
            parent_id: message.parent_id,
            body: message.body,
            created_at: message.created_at,
            edited_at: None,
            deleted_at: None,
            deleted_by: None,
        };
        self.state().messages.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.state().messages.get(&id).cloned())
    }

    async fn lock_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError> {
        // The handle already holds the store-wide lock
        self.get_message(id).await
    }

    async fn update_message_body(
        &mut self,
        id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(message) = self.state().messages.get_mut(&id) {
            message.body = body.to_string();
            message.edited_at = Some(edited_at);
        }
        Ok(())
    }

    async fn soft_delete_messages(
        &mut self,
        ids: &[Uuid],
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state();
        let mut changed = 0;
        for id in unique(ids) {
            if let Some(message) = state.messages.get_mut(&id) {
                if message.deleted_at.is_none() {
                    message.deleted_at = Some(deleted_at);
                    message.deleted_by = Some(deleted_by);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn list_reply_ids(&mut self, parent_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .list_replies(parent_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    async fn list_channel_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> = self
            .state()
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.parent_id.is_none() && !m.is_deleted())
            .filter(|m| range.since.is_none_or(|since| m.created_at > since))
            .filter(|m| range.until.is_none_or(|until| m.created_at < until))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages.truncate(range.limit.max(0) as usize);
        Ok(messages)
    }

    async fn list_replies(&mut self, parent_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let mut replies: Vec<Message> = self
            .state()
            .messages
            .values()
            .filter(|m| m.parent_id == Some(parent_id) && !m.is_deleted())
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(replies)
    }

    async fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        Ok(self
            .state()
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id && !m.is_deleted())
            .filter(|m| after.is_none_or(|after| m.created_at > after))
            .count() as i64)
    }
}

#[async_trait]
impl AttachmentRepository for MemRepos {
    async fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StoreError> {
        let state = self.state();
        if state.attachments.contains_key(&attachment.id) {
            return Err(StoreError::unique("attachments_pkey"));
        }
        state.attachments.insert(attachment.id, attachment.clone());
        Ok(())
    }

    async fn get_attachments(&mut self, ids: &[Uuid]) -> Result<Vec<Attachment>, StoreError> {
        let state = self.state();
        Ok(unique(ids)
            .filter_map(|id| state.attachments.get(&id).cloned())
            .collect())
    }

    async fn bind_attachments(
        &mut self,
        ids: &[Uuid],
        message_id: Uuid,
        uploaded_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state();
        let mut changed = 0;
        for id in unique(ids) {
            if let Some(attachment) = state.attachments.get_mut(&id) {
                if attachment.status == AttachmentStatus::Pending {
                    attachment.status = AttachmentStatus::Attached;
                    attachment.message_id = Some(message_id);
                    attachment.uploaded_at = Some(uploaded_at);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn list_message_attachments(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<Attachment>, StoreError> {
        let wanted: HashSet<Uuid> = message_ids.iter().copied().collect();
        let mut attachments: Vec<Attachment> = self
            .state()
            .attachments
            .values()
            .filter(|a| a.message_id.is_some_and(|m| wanted.contains(&m)))
            .cloned()
            .collect();
        attachments.sort_by_key(|a| a.created_at);
        Ok(attachments)
    }
}

#[async_trait]
impl MentionRepository for MemRepos {
    async fn insert_user_mentions(
        &mut self,
        message_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let state = self.state();
        for user_id in unique(user_ids) {
            let exists = state
                .user_mentions
                .iter()
                .any(|m| m.message_id == message_id && m.user_id == user_id);
            if !exists {
                state.user_mentions.push(UserMention {
                    message_id,
                    user_id,
                    created_at: at,
                });
            }
        }
        Ok(())
    }

    async fn insert_group_mentions(
        &mut self,
        message_id: Uuid,
        group_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let state = self.state();
        for group_id in unique(group_ids) {
            let exists = state
                .group_mentions
                .iter()
                .any(|m| m.message_id == message_id && m.group_id == group_id);
            if !exists {
                state.group_mentions.push(GroupMention {
                    message_id,
                    group_id,
                    created_at: at,
                });
            }
        }
        Ok(())
    }

    async fn delete_mentions(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        let state = self.state();
        state.user_mentions.retain(|m| m.message_id != message_id);
        state.group_mentions.retain(|m| m.message_id != message_id);
        Ok(())
    }

    async fn list_user_mentions(&mut self, message_ids: &[Uuid]) -> Result<Vec<UserMention>, StoreError> {
        Ok(self
            .state()
            .user_mentions
            .iter()
            .filter(|m| message_ids.contains(&m.message_id))
            .cloned()
            .collect())
    }

    async fn list_group_mentions(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<GroupMention>, StoreError> {
        Ok(self
            .state()
            .group_mentions
            .iter()
            .filter(|m| message_ids.contains(&m.message_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LinkRepository for MemRepos {
    async fn find_preview_by_url(&mut self, url: &str) -> Result<Option<LinkPreview>, StoreError> {
        Ok(self
            .state()
            .link_previews
            .values()
            .find(|p| p.url == url)
            .cloned())
    }

    async fn upsert_preview(&mut self, preview: &LinkPreview) -> Result<LinkPreview, StoreError> {
        if let Some(existing) = self.find_preview_by_url(&preview.url).await? {
            return Ok(existing);
        }
        self.state().link_previews.insert(preview.id, preview.clone());
        Ok(preview.clone())
    }

    async fn attach_link(
        &mut self,
        message_id: Uuid,
        link_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let state = self.state();
        let exists = state
            .message_links
            .iter()
            .any(|(m, l, _)| *m == message_id && *l == link_id);
        if !exists {
            state.message_links.push((message_id, link_id, at));
        }
        Ok(())
    }

    async fn delete_message_links(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        self.state().message_links.retain(|(m, _, _)| *m != message_id);
        Ok(())
    }

    async fn list_message_links(&mut self, message_ids: &[Uuid]) -> Result<Vec<MessageLink>, StoreError> {
        let state = self.state();
        Ok(state
            .message_links
            .iter()
            .filter(|(m, _, _)| message_ids.contains(m))
            .filter_map(|(m, l, _)| {
                state.link_previews.get(l).map(|link| MessageLink {
                    message_id: *m,
                    link: link.clone(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl ReactionRepository for MemRepos {
    async fn insert_reaction(&mut self, reaction: &Reaction) -> Result<(), StoreError> {
        let state = self.state();
        let exists = state.reactions.iter().any(|r| {
            r.message_id == reaction.message_id
                && r.user_id == reaction.user_id
                && r.emoji == reaction.emoji
        });
        if exists {
            return Err(StoreError::unique("message_reactions_pkey"));
        }
        state.reactions.push(reaction.clone());
        Ok(())
    }

    async fn delete_reaction(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state();
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok(state.reactions.len() != before)
    }

    async fn list_reactions(&mut self, message_ids: &[Uuid]) -> Result<Vec<Reaction>, StoreError> {
        let mut reactions: Vec<Reaction> = self
            .state()
            .reactions
            .iter()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect();
        reactions.sort_by_key(|r| r.created_at);
        Ok(reactions)
    }
}

#[async_trait]
impl ReadStateRepository for MemRepos {
    async fn upsert_read_state(&mut self, state: &ChannelReadState) -> Result<(), StoreError> {
        self.state()
            .read_states
            .insert((state.channel_id, state.user_id), state.clone());
        Ok(())
    }

    async fn get_read_state(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelReadState>, StoreError> {
        Ok(self.state().read_states.get(&(channel_id, user_id)).cloned())
    }
}

#[async_trait]
impl ThreadRepository for MemRepos {
    async fn get_thread_metadata(&mut self, message_id: Uuid) -> Result<Option<ThreadMetadata>, StoreError> {
        Ok(self.state().thread_metadata.get(&message_id).cloned())
    }

    async fn list_thread_metadata(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ThreadMetadata>, StoreError> {
        let state = self.state();
        Ok(unique(message_ids)
            .filter_map(|id| state.thread_metadata.get(&id).cloned())
            .collect())
    }

    async fn save_thread_metadata(&mut self, metadata: &ThreadMetadata) -> Result<(), StoreError> {
        self.state()
            .thread_metadata
            .insert(metadata.message_id, metadata.clone());
        Ok(())
    }

    async fn delete_thread_metadata(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        self.state().thread_metadata.remove(&message_id);
        Ok(())
    }

    async fn follow_thread(
        &mut self,
        user_id: Uuid,
        thread_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state()
            .thread_follows
            .entry((user_id, thread_id))
            .or_insert(at);
        Ok(())
    }

    async fn list_thread_followers(&mut self, thread_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let mut followers: Vec<(Uuid, DateTime<Utc>)> = self
            .state()
            .thread_follows
            .iter()
            .filter(|((_, thread), _)| *thread == thread_id)
            .map(|((user, _), at)| (*user, *at))
            .collect();
        followers.sort_by_key(|(_, at)| *at);
        Ok(followers.into_iter().map(|(user, _)| user).collect())
    }
}

#[async_trait]
impl SessionRepository for MemRepos {
    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        let state = self.state();
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::unique("sessions_pkey"));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state().sessions.get(&id).cloned())
    }
}

#[async_trait]
impl SystemMessageRepository for MemRepos {
    async fn insert_system_message(&mut self, message: &SystemMessage) -> Result<(), StoreError> {
        let state = self.state();
        if state.system_messages.contains_key(&message.id) {
            return Err(StoreError::unique("system_messages_pkey"));
        }
        state.system_messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn list_system_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<SystemMessage>, StoreError> {
        let mut entries: Vec<SystemMessage> = self
            .state()
            .system_messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .filter(|m| range.since.is_none_or(|since| m.created_at > since))
            .filter(|m| range.until.is_none_or(|until| m.created_at < until))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entries.truncate(range.limit.max(0) as usize);
        Ok(entries)
    }
}

/// Deduplicate ids while keeping first-seen order
fn unique(ids: &[Uuid]) -> impl Iterator<Item = Uuid> + '_ {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(move |id| seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", name),
            display_name: name.to_string(),
            avatar_url: None,
            password_hash: "x".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let alice = user("alice");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user(&alice).await.unwrap();
        }

        let mut conn = store.connect().await.unwrap();
        assert!(conn.get_user(alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let alice = user("alice");

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&alice).await.unwrap();
        tx.commit().await.unwrap();

        let mut conn = store.connect().await.unwrap();
        assert_eq!(conn.get_user(alice.id).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();
        conn.insert_user(&user("alice")).await.unwrap();
        let err = conn.insert_user(&user("alice")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_duplicate_reaction_is_unique_violation() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();
        let reaction = Reaction {
            message_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            emoji: "👍".to_string(),
            created_at: Utc::now(),
        };
        conn.insert_reaction(&reaction).await.unwrap();
        assert!(conn.insert_reaction(&reaction).await.unwrap_err().is_unique_violation());
        assert!(conn
            .delete_reaction(reaction.message_id, reaction.user_id, "👍")
            .await
            .unwrap());
        assert!(!conn
            .delete_reaction(reaction.message_id, reaction.user_id, "👍")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_upsert_preview_keeps_existing_row() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();

        let mut first = LinkPreview::url_only("https://example.com");
        first.title = Some("Example".to_string());
        let stored = conn.upsert_preview(&first).await.unwrap();
        assert_eq!(stored.id, first.id);

        let second = LinkPreview::url_only("https://example.com");
        let stored = conn.upsert_preview(&second).await.unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.title.as_deref(), Some("Example"));
    }

    #[tokio::test]
    async fn test_channel_listing_excludes_replies_and_deleted() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();
        let channel_id = Uuid::new_v4();
        let author = Uuid::new_v4();

        let new = |parent_id, body: &str| NewMessage {
            channel_id,
            user_id: author,
            parent_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        let first = conn.insert_message(new(None, "first")).await.unwrap();
        conn.insert_message(new(Some(first.id), "reply")).await.unwrap();
        let gone = conn.insert_message(new(None, "gone")).await.unwrap();
        let last = conn.insert_message(new(None, "last")).await.unwrap();
        conn.soft_delete_messages(&[gone.id], author, Utc::now())
            .await
            .unwrap();

        let range = MessageRange {
            since: None,
            until: None,
            limit: 10,
        };
        let ids: Vec<Uuid> = conn
            .list_channel_messages(channel_id, range)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![last.id, first.id]);
        assert_eq!(conn.count_messages_after(channel_id, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insert_message_keeps_supplied_created_at() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();
        let at = Utc::now() - chrono::Duration::minutes(5);

        let message = conn
            .insert_message(NewMessage {
                channel_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                parent_id: None,
                body: "from the app clock".to_string(),
                created_at: at,
            })
            .await
            .unwrap();
        assert_eq!(message.created_at, at);
        assert_eq!(conn.get_message(message.id).await.unwrap().unwrap().created_at, at);
    }
}
