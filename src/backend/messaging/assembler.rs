//! Message Output Assembler
//!
//! Turns stored rows into [`MessageView`]s. [`assemble`] is pure: it reads
//! only the [`RelatedRows`] it is given. [`RelatedRows::load`] does the
//! batched fetching for a page of messages, one query per relation.

use std::collections::HashMap;

use uuid::Uuid;

use crate::backend::store::models::{
    Attachment, Message, Reaction, ThreadMetadata, User, UserGroup,
};
use crate::backend::store::prelude::*;
use crate::shared::message::{
    AttachmentView, GroupMentionView, LinkView, MentionView, MessageView, ReactionView,
    ThreadView, UserView,
};

/// Related rows for a batch of messages, keyed for lookup
#[derive(Debug, Default)]
pub struct RelatedRows {
    pub users: HashMap<Uuid, User>,
    pub groups: HashMap<Uuid, UserGroup>,
    pub user_mentions: HashMap<Uuid, Vec<Uuid>>,
    pub group_mentions: HashMap<Uuid, Vec<Uuid>>,
    pub links: HashMap<Uuid, Vec<LinkView>>,
    pub reactions: HashMap<Uuid, Vec<Reaction>>,
    pub attachments: HashMap<Uuid, Vec<Attachment>>,
    pub threads: HashMap<Uuid, ThreadMetadata>,
}

impl RelatedRows {
    /// Fetch everything needed to render `messages`
    pub async fn load(repos: &mut dyn Repos, messages: &[Message]) -> Result<Self, StoreError> {
        let mut related = Self::default();
        if messages.is_empty() {
            return Ok(related);
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        for mention in repos.list_user_mentions(&ids).await? {
            related
                .user_mentions
                .entry(mention.message_id)
                .or_default()
                .push(mention.user_id);
        }
        for mention in repos.list_group_mentions(&ids).await? {
            related
                .group_mentions
                .entry(mention.message_id)
                .or_default()
                .push(mention.group_id);
        }
        for link in repos.list_message_links(&ids).await? {
            related
                .links
                .entry(link.message_id)
                .or_default()
                .push(link_view(link.link));
        }
        for reaction in repos.list_reactions(&ids).await? {
            related
                .reactions
                .entry(reaction.message_id)
                .or_default()
                .push(reaction);
        }
        for attachment in repos.list_message_attachments(&ids).await? {
            if let Some(message_id) = attachment.message_id {
                related.attachments.entry(message_id).or_default().push(attachment);
            }
        }

        let parents: Vec<Uuid> = messages
            .iter()
            .filter(|m| !m.is_reply())
            .map(|m| m.id)
            .collect();
        if !parents.is_empty() {
            for metadata in repos.list_thread_metadata(&parents).await? {
                related.threads.insert(metadata.message_id, metadata);
            }
        }

        // Authors, deleters, mentioned users and reactors in one lookup
        let mut user_ids: Vec<Uuid> = Vec::new();
        for message in messages {
            user_ids.push(message.user_id);
            user_ids.extend(message.deleted_by);
        }
        user_ids.extend(related.user_mentions.values().flatten().copied());
        user_ids.extend(related.reactions.values().flatten().map(|r| r.user_id));
        user_ids.sort_unstable();
        user_ids.dedup();
        for user in repos.get_users(&user_ids).await? {
            related.users.insert(user.id, user);
        }

        let mut group_ids: Vec<Uuid> = related.group_mentions.values().flatten().copied().collect();
        group_ids.sort_unstable();
        group_ids.dedup();
        if !group_ids.is_empty() {
            for group in repos.get_groups(&group_ids).await? {
                related.groups.insert(group.id, group);
            }
        }

        Ok(related)
    }

    fn user_view(&self, id: Uuid) -> UserView {
        match self.users.get(&id) {
            Some(user) => UserView {
                id,
                display_name: user.display_name.clone(),
                avatar_url: user.avatar_url.clone(),
            },
            None => UserView::unknown(id),
        }
    }
}

/// Build the external view of one message
pub fn assemble(message: &Message, related: &RelatedRows) -> MessageView {
    let mentions = related
        .user_mentions
        .get(&message.id)
        .map(|ids| {
            ids.iter()
                .map(|id| MentionView {
                    user_id: *id,
                    display_name: related
                        .users
                        .get(id)
                        .map(|u| u.display_name.clone())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let groups = related
        .group_mentions
        .get(&message.id)
        .map(|ids| {
            ids.iter()
                .map(|id| GroupMentionView {
                    group_id: *id,
                    name: related
                        .groups
                        .get(id)
                        .map(|g| g.name.clone())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut reactions: Vec<ReactionView> = related
        .reactions
        .get(&message.id)
        .map(|rows| {
            rows.iter()
                .map(|r| ReactionView {
                    user: related.user_view(r.user_id),
                    emoji: r.emoji.clone(),
                    created_at: r.created_at,
                })
                .collect()
        })
        .unwrap_or_default();
    // Stable, so equal timestamps keep storage order
    reactions.sort_by_key(|r| r.created_at);

    let attachments = related
        .attachments
        .get(&message.id)
        .map(|rows| {
            rows.iter()
                .map(|a| AttachmentView {
                    id: a.id,
                    file_name: a.file_name.clone(),
                    mime_type: a.mime_type.clone(),
                    size_bytes: a.size_bytes,
                })
                .collect()
        })
        .unwrap_or_default();

    let thread = if message.is_reply() {
        None
    } else {
        Some(
            related
                .threads
                .get(&message.id)
                .map(thread_view)
                .unwrap_or_default(),
        )
    };

    MessageView {
        id: message.id,
        channel_id: message.channel_id,
        user: related.user_view(message.user_id),
        parent_id: message.parent_id,
        body: message.body.clone(),
        mentions,
        groups,
        links: related.links.get(&message.id).cloned().unwrap_or_default(),
        reactions,
        attachments,
        thread,
        created_at: message.created_at,
        edited_at: message.edited_at,
        is_deleted: message.is_deleted(),
        deleted_at: message.deleted_at,
        deleted_by: message.deleted_by.map(|id| related.user_view(id)),
    }
}

/// Load related rows for `messages` and assemble each, preserving order
pub async fn assemble_many(
    repos: &mut dyn Repos,
    messages: &[Message],
) -> Result<Vec<MessageView>, StoreError> {
    let related = RelatedRows::load(repos, messages).await?;
    Ok(messages.iter().map(|m| assemble(m, &related)).collect())
}

/// Load and assemble a single message
pub async fn assemble_one(repos: &mut dyn Repos, message: &Message) -> Result<MessageView, StoreError> {
    let related = RelatedRows::load(repos, std::slice::from_ref(message)).await?;
    Ok(assemble(message, &related))
}

pub fn thread_view(metadata: &ThreadMetadata) -> ThreadView {
    ThreadView {
        reply_count: metadata.reply_count,
        last_reply_at: metadata.last_reply_at,
        last_reply_user_id: metadata.last_reply_user_id,
        participant_ids: metadata.participant_ids.clone(),
    }
}

fn link_view(link: crate::backend::store::models::LinkPreview) -> LinkView {
    LinkView {
        id: link.id,
        url: link.url,
        title: link.title,
        description: link.description,
        image_url: link.image_url,
        site_name: link.site_name,
        card_type: link.card_type,
    }
}
