/**
 * Message Pipeline
 *
 * Transactional create, update and delete of channel messages, plus the
 * read paths that render them (timeline pages and threads).
 *
 * # Write Path
 *
 * Every write runs in one store transaction: access check, the row change,
 * then the derived rows (attachments, thread summary, mentions, links) and
 * finally the assembled view. The notifier is called only after `commit`
 * succeeds, so a rolled-back write is never announced.
 *
 * Link previews are fetched before the transaction opens, after a
 * preliminary permission check, so slow OGP calls never hold a store handle.
 *
 * # Permissions
 *
 * Reading and posting require channel access (`ensure_access`). Editing and
 * deleting additionally require authorship or a workspace owner/admin role.
 */
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::backend::access::{ensure_access, ensure_can_modify};
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::messaging::assembler::{assemble_many, assemble_one, thread_view};
use crate::backend::messaging::links::{attach_links, prefetch_previews, OgpFetcher};
use crate::backend::messaging::mentions::write_mentions;
use crate::backend::messaging::threads;
use crate::backend::realtime::notifier::Notifier;
use crate::backend::store::models::{AttachmentStatus, Message, MessageRange, NewMessage, SystemMessage};
use crate::backend::store::prelude::*;
use crate::shared::message::{MessageListView, MessageView, SystemMessageView, ThreadDetailView};
use crate::shared::validation::{resolve_limit, validate_body};

/// Input to [`MessagePipeline::create`]
#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub parent_id: Option<Uuid>,
    pub attachment_ids: Vec<Uuid>,
}

/// Timeline page bounds; both time bounds are exclusive
#[derive(Debug, Clone, Copy, Default)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MessagePipeline {
    pub(super) store: Arc<dyn Store>,
    pub(super) notifier: Arc<dyn Notifier>,
    ogp: Arc<dyn OgpFetcher>,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, ogp: Arc<dyn OgpFetcher>) -> Self {
        Self {
            store,
            notifier,
            ogp,
        }
    }

    pub async fn create(&self, input: CreateMessage) -> BackendResult<MessageView> {
        validate_body(&input.body)?;

        {
            let mut repos = self.store.connect().await?;
            ensure_access(repos.as_mut(), input.channel_id, input.user_id).await?;
        }
        let links = prefetch_previews(self.store.as_ref(), self.ogp.as_ref(), &input.body).await?;

        let mut tx = self.store.begin().await?;
        let channel = ensure_access(tx.as_mut(), input.channel_id, input.user_id).await?;

        if let Some(parent_id) = input.parent_id {
            // One level of threading: the parent must be a live top-level message here
            let parent_ok = tx
                .get_message(parent_id)
                .await?
                .is_some_and(|p| p.channel_id == channel.id && !p.is_reply() && !p.is_deleted());
            if !parent_ok {
                return Err(BackendError::parent_message_not_found());
            }
        }

        let message = tx
            .insert_message(NewMessage {
                channel_id: channel.id,
                user_id: input.user_id,
                parent_id: input.parent_id,
                body: input.body,
                created_at: Utc::now(),
            })
            .await?;

        if !input.attachment_ids.is_empty() {
            bind_attachments(tx.as_mut(), &input.attachment_ids, &message).await?;
        }

        if let Some(parent_id) = message.parent_id {
            threads::increment_reply_count(tx.as_mut(), parent_id, message.user_id, message.created_at)
                .await?;
        }

        write_mentions(
            tx.as_mut(),
            &channel.workspace_id,
            message.id,
            &message.body,
            message.created_at,
        )
        .await?;
        attach_links(tx.as_mut(), message.id, &links, message.created_at).await?;

        let view = assemble_one(tx.as_mut(), &message).await?;
        tx.commit().await?;

        tracing::info!(
            message_id = %message.id,
            channel_id = %channel.id,
            user_id = %message.user_id,
            "[Pipeline] Message created"
        );
        self.notifier
            .notify_new(&channel.workspace_id, channel.id, &view)
            .await;
        Ok(view)
    }

    /// Replace the body and re-derive mentions and links from it
    pub async fn update(&self, message_id: Uuid, editor_id: Uuid, body: String) -> BackendResult<MessageView> {
        validate_body(&body)?;

        {
            let mut repos = self.store.connect().await?;
            let message = repos
                .get_message(message_id)
                .await?
                .ok_or_else(BackendError::message_not_found)?;
            if message.is_deleted() {
                return Err(BackendError::cannot_edit_deleted());
            }
            let channel = ensure_access(repos.as_mut(), message.channel_id, editor_id).await?;
            ensure_can_modify(repos.as_mut(), &channel, &message, editor_id).await?;
        }
        let links = prefetch_previews(self.store.as_ref(), self.ogp.as_ref(), &body).await?;

        let mut tx = self.store.begin().await?;
        let message = tx
            .lock_message(message_id)
            .await?
            .ok_or_else(BackendError::message_not_found)?;
        if message.is_deleted() {
            return Err(BackendError::cannot_edit_deleted());
        }
        let channel = ensure_access(tx.as_mut(), message.channel_id, editor_id).await?;
        ensure_can_modify(tx.as_mut(), &channel, &message, editor_id).await?;

        // Strictly after creation even when both land in the same tick
        let edited_at = Utc::now().max(message.created_at + Duration::microseconds(1));
        tx.update_message_body(message.id, &body, edited_at).await?;
        tx.delete_mentions(message.id).await?;
        tx.delete_message_links(message.id).await?;
        write_mentions(tx.as_mut(), &channel.workspace_id, message.id, &body, edited_at).await?;
        attach_links(tx.as_mut(), message.id, &links, edited_at).await?;

        let updated = tx
            .get_message(message.id)
            .await?
            .ok_or_else(|| BackendError::internal("edited message vanished inside its transaction"))?;
        let view = assemble_one(tx.as_mut(), &updated).await?;
        tx.commit().await?;

        tracing::info!(message_id = %message.id, editor_id = %editor_id, "[Pipeline] Message edited");
        self.notifier
            .notify_updated(&channel.workspace_id, channel.id, &view)
            .await;
        Ok(view)
    }

    /// Soft-delete a message; a thread parent takes its live replies with it
    ///
    /// Returns every id that was deleted.
    pub async fn delete(&self, message_id: Uuid, executor_id: Uuid) -> BackendResult<Vec<Uuid>> {
        let mut tx = self.store.begin().await?;
        let message = tx
            .lock_message(message_id)
            .await?
            .ok_or_else(BackendError::message_not_found)?;
        if message.is_deleted() {
            return Err(BackendError::message_already_deleted());
        }
        let channel = ensure_access(tx.as_mut(), message.channel_id, executor_id).await?;
        ensure_can_modify(tx.as_mut(), &channel, &message, executor_id).await?;

        let mut ids = vec![message.id];
        if !message.is_reply() {
            ids.extend(tx.list_reply_ids(message.id).await?);
        }

        tx.soft_delete_messages(&ids, executor_id, Utc::now()).await?;
        if !message.is_reply() {
            threads::delete_metadata(tx.as_mut(), message.id).await?;
        }
        tx.commit().await?;

        tracing::info!(
            message_id = %message.id,
            executor_id = %executor_id,
            cascaded = ids.len() - 1,
            "[Pipeline] Message deleted"
        );
        self.notifier
            .notify_deleted(&channel.workspace_id, channel.id, &ids)
            .await;
        Ok(ids)
    }

    /// Newest-first timeline page: live top-level messages and system entries
    pub async fn list(&self, channel_id: Uuid, user_id: Uuid, query: ListQuery) -> BackendResult<MessageListView> {
        let limit = resolve_limit(query.limit)?;

        let mut repos = self.store.connect().await?;
        let channel = ensure_access(repos.as_mut(), channel_id, user_id).await?;

        // One extra row from each source tells whether another page exists
        let range = MessageRange {
            since: query.since,
            until: query.until,
            limit: limit + 1,
        };
        let rows = repos.list_channel_messages(channel.id, range).await?;
        let system = repos.list_system_messages(channel.id, range).await?;
        let page = page_timeline(rows, system, limit as usize);

        let messages = assemble_many(repos.as_mut(), &page.messages).await?;
        Ok(MessageListView {
            messages,
            system_messages: page.system.iter().map(system_message_view).collect(),
            has_more: page.has_more,
        })
    }

    /// Parent, live replies oldest first, and the thread summary
    ///
    /// A reply id resolves to its parent's thread.
    pub async fn get_thread(&self, message_id: Uuid, user_id: Uuid) -> BackendResult<ThreadDetailView> {
        let mut repos = self.store.connect().await?;
        let message = repos
            .get_message(message_id)
            .await?
            .ok_or_else(BackendError::message_not_found)?;
        let parent = match message.parent_id {
            Some(parent_id) => repos
                .get_message(parent_id)
                .await?
                .ok_or_else(BackendError::message_not_found)?,
            None => message,
        };
        ensure_access(repos.as_mut(), parent.channel_id, user_id).await?;

        let mut rows: Vec<Message> = vec![parent.clone()];
        rows.extend(repos.list_replies(parent.id).await?);
        let mut views = assemble_many(repos.as_mut(), &rows).await?;
        let metadata = threads::get_metadata(repos.as_mut(), parent.id).await?;

        let replies = views.split_off(1);
        let parent_view = views
            .pop()
            .ok_or_else(|| BackendError::internal("thread parent missing from assembled views"))?;
        Ok(ThreadDetailView {
            parent: parent_view,
            replies,
            metadata: thread_view(&metadata),
        })
    }
}

struct TimelinePage {
    messages: Vec<Message>,
    system: Vec<SystemMessage>,
    has_more: bool,
}

/// Merge two newest-first lists and keep the newest `limit` entries
fn page_timeline(messages: Vec<Message>, system: Vec<SystemMessage>, limit: usize) -> TimelinePage {
    let mut messages = messages.into_iter().peekable();
    let mut system = system.into_iter().peekable();
    let mut page = TimelinePage {
        messages: Vec::new(),
        system: Vec::new(),
        has_more: false,
    };

    for _ in 0..limit {
        let take_message = match (messages.peek(), system.peek()) {
            (Some(m), Some(s)) => m.created_at >= s.created_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_message {
            page.messages.extend(messages.next());
        } else {
            page.system.extend(system.next());
        }
    }
    page.has_more = messages.peek().is_some() || system.peek().is_some();
    page
}

fn system_message_view(entry: &SystemMessage) -> SystemMessageView {
    SystemMessageView {
        id: entry.id,
        channel_id: entry.channel_id,
        kind: entry.kind.as_str().to_string(),
        payload: entry.payload.clone(),
        actor_id: entry.actor_id,
        created_at: entry.created_at,
    }
}

/// All-or-nothing binding of pending uploads to a new message
async fn bind_attachments(repos: &mut dyn Repos, ids: &[Uuid], message: &Message) -> BackendResult<()> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let attachments = repos.get_attachments(&ids).await?;
    if attachments.len() != ids.len() {
        return Err(BackendError::attachment_not_found());
    }

    let now = Utc::now();
    for attachment in &attachments {
        if attachment.uploader_id != message.user_id {
            return Err(BackendError::invalid_attachment(format!(
                "attachment {} was uploaded by someone else",
                attachment.id
            )));
        }
        if attachment.status != AttachmentStatus::Pending || attachment.expires_at <= now {
            return Err(BackendError::invalid_attachment(format!(
                "attachment {} is not a pending upload",
                attachment.id
            )));
        }
        if attachment.channel_id != message.channel_id {
            return Err(BackendError::invalid_attachment(format!(
                "attachment {} belongs to another channel",
                attachment.id
            )));
        }
    }

    let bound = repos.bind_attachments(&ids, message.id, now).await?;
    if bound != ids.len() as u64 {
        return Err(BackendError::invalid_attachment("attachments changed while binding"));
    }
    Ok(())
}
