//! PostgreSQL store
//!
//! Raw `sqlx::query` calls with explicit binds and row mapping. A handle
//! wraps either a pooled connection (autocommit) or an open transaction;
//! every query goes through [`PgRepos::conn`] so both cases share one code
//! path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::models::*;
use super::*;

/// Store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn connect(&self) -> Result<Box<dyn Repos>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgRepos {
            conn: PgConn::Pool(conn),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Repos>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRepos {
            conn: PgConn::Tx(tx),
        }))
    }
}

enum PgConn {
    Pool(PoolConnection<Postgres>),
    Tx(Transaction<'static, Postgres>),
}

struct PgRepos {
    conn: PgConn,
}

impl PgRepos {
    fn conn(&mut self) -> &mut PgConnection {
        match &mut self.conn {
            PgConn::Pool(conn) => &mut **conn,
            PgConn::Tx(tx) => &mut **tx,
        }
    }
}

/// Translate unique-constraint failures into `StoreError::UniqueViolation`
fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::unique(db.constraint().unwrap_or("unknown"));
        }
    }
    StoreError::Sqlx(err)
}

fn parse_enum<T: std::str::FromStr>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("{} = '{}'", column, raw)))
}

const USER_COLUMNS: &str = "id, email, display_name, avatar_url, password_hash, created_at, updated_at";

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const WORKSPACE_COLUMNS: &str =
    "id, name, description, icon_url, is_public, created_by, created_at, updated_at";

fn workspace_from_row(row: &PgRow) -> Result<Workspace, StoreError> {
    Ok(Workspace {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon_url: row.try_get("icon_url")?,
        is_public: row.try_get("is_public")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const CHANNEL_COLUMNS: &str =
    "id, workspace_id, name, description, is_private, created_by, created_at, updated_at";

fn channel_from_row(row: &PgRow) -> Result<Channel, StoreError> {
    Ok(Channel {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_private: row.try_get("is_private")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<UserGroup, StoreError> {
    Ok(UserGroup {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, channel_id, user_id, parent_id, body, created_at, edited_at, deleted_at, deleted_by";

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    Ok(Message {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        user_id: row.try_get("user_id")?,
        parent_id: row.try_get("parent_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
        edited_at: row.try_get("edited_at")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
    })
}

const ATTACHMENT_COLUMNS: &str = "id, message_id, uploader_id, channel_id, file_name, mime_type, \
     size_bytes, storage_key, status, uploaded_at, expires_at, created_at";

fn attachment_from_row(row: &PgRow) -> Result<Attachment, StoreError> {
    Ok(Attachment {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        uploader_id: row.try_get("uploader_id")?,
        channel_id: row.try_get("channel_id")?,
        file_name: row.try_get("file_name")?,
        mime_type: row.try_get("mime_type")?,
        size_bytes: row.try_get("size_bytes")?,
        storage_key: row.try_get("storage_key")?,
        status: parse_enum(row, "status")?,
        uploaded_at: row.try_get("uploaded_at")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const PREVIEW_COLUMNS: &str =
    "id, url, title, description, image_url, site_name, card_type, created_at";

fn preview_from_row(row: &PgRow) -> Result<LinkPreview, StoreError> {
    Ok(LinkPreview {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        site_name: row.try_get("site_name")?,
        card_type: row.try_get("card_type")?,
        created_at: row.try_get("created_at")?,
    })
}

const THREAD_COLUMNS: &str = "message_id, reply_count, last_reply_at, last_reply_user_id, \
     participant_ids, created_at, updated_at";

fn thread_from_row(row: &PgRow) -> Result<ThreadMetadata, StoreError> {
    Ok(ThreadMetadata {
        message_id: row.try_get("message_id")?,
        reply_count: row.try_get("reply_count")?,
        last_reply_at: row.try_get("last_reply_at")?,
        last_reply_user_id: row.try_get("last_reply_user_id")?,
        participant_ids: row.try_get("participant_ids")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_rows<T>(
    rows: Vec<PgRow>,
    f: impl Fn(&PgRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(f).collect()
}

#[async_trait]
impl Repos for PgRepos {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgRepos { conn } = *self;
        match conn {
            PgConn::Tx(tx) => tx.commit().await?,
            PgConn::Pool(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgRepos {
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, avatar_url, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.conn()).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_users(&mut self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM users WHERE id = ANY($1)", USER_COLUMNS);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(self.conn()).await?;
        map_rows(rows, user_from_row)
    }

    async fn find_members_by_display_name(
        &mut self,
        workspace_id: &str,
        display_name: &str,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.email, u.display_name, u.avatar_url, u.password_hash, u.created_at, u.updated_at
            FROM users u
            JOIN workspace_members wm ON wm.user_id = u.id
            WHERE wm.workspace_id = $1 AND u.display_name = $2
            "#,
        )
        .bind(workspace_id)
        .bind(display_name)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, user_from_row)
    }
}

#[async_trait]
impl WorkspaceRepository for PgRepos {
    async fn insert_workspace(&mut self, workspace: &Workspace) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, description, icon_url, is_public, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.description)
        .bind(&workspace.icon_url)
        .bind(workspace.is_public)
        .bind(workspace.created_by)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_workspace(&mut self, id: &str) -> Result<Option<Workspace>, StoreError> {
        let sql = format!("SELECT {} FROM workspaces WHERE id = $1", WORKSPACE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.conn()).await?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    async fn add_workspace_member(&mut self, member: &WorkspaceMember) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&member.workspace_id)
        .bind(member.user_id)
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_workspace_member(
        &mut self,
        workspace_id: &str,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceMember>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workspace_id, user_id, role, joined_at
            FROM workspace_members
            WHERE workspace_id = $1 AND user_id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(self.conn())
        .await?;

        row.map(|r| -> Result<WorkspaceMember, StoreError> {
            Ok(WorkspaceMember {
                workspace_id: r.try_get("workspace_id")?,
                user_id: r.try_get("user_id")?,
                role: parse_enum(&r, "role")?,
                joined_at: r.try_get("joined_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ChannelRepository for PgRepos {
    async fn insert_channel(&mut self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, workspace_id, name, description, is_private, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(channel.id)
        .bind(&channel.workspace_id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.is_private)
        .bind(channel.created_by)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_channel(&mut self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        let sql = format!("SELECT {} FROM channels WHERE id = $1", CHANNEL_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.conn()).await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn add_channel_member(&mut self, member: &ChannelMember) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_members (channel_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(member.channel_id)
        .bind(member.user_id)
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_channel_member(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelMember>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT channel_id, user_id, role, joined_at
            FROM channel_members
            WHERE channel_id = $1 AND user_id = $2
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.conn())
        .await?;

        row.map(|r| -> Result<ChannelMember, StoreError> {
            Ok(ChannelMember {
                channel_id: r.try_get("channel_id")?,
                user_id: r.try_get("user_id")?,
                role: parse_enum(&r, "role")?,
                joined_at: r.try_get("joined_at")?,
            })
        })
        .transpose()
    }

    async fn list_accessible_channels(&mut self, user_id: Uuid) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.workspace_id, c.name, c.description, c.is_private, c.created_by, c.created_at, c.updated_at
            FROM channels c
            WHERE (c.is_private = FALSE AND EXISTS (
                      SELECT 1 FROM workspace_members wm
                      WHERE wm.workspace_id = c.workspace_id AND wm.user_id = $1))
               OR (c.is_private = TRUE AND EXISTS (
                      SELECT 1 FROM channel_members cm
                      WHERE cm.channel_id = c.id AND cm.user_id = $1))
            ORDER BY c.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, channel_from_row)
    }
}

#[async_trait]
impl UserGroupRepository for PgRepos {
    async fn insert_group(&mut self, group: &UserGroup) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_groups (id, workspace_id, name, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(group.id)
        .bind(&group.workspace_id)
        .bind(&group.name)
        .bind(group.created_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn find_groups_by_name(
        &mut self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Vec<UserGroup>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, created_at FROM user_groups WHERE workspace_id = $1 AND name = $2",
        )
        .bind(workspace_id)
        .bind(name)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, group_from_row)
    }

    async fn get_groups(&mut self, ids: &[Uuid]) -> Result<Vec<UserGroup>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id, workspace_id, name, created_at FROM user_groups WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.conn())
            .await?;
        map_rows(rows, group_from_row)
    }
}

#[async_trait]
impl MessageRepository for PgRepos {
    async fn insert_message(&mut self, message: NewMessage) -> Result<Message, StoreError> {
        let sql = format!(
            "INSERT INTO messages (id, channel_id, user_id, parent_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            MESSAGE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(message.channel_id)
            .bind(message.user_id)
            .bind(message.parent_id)
            .bind(&message.body)
            .bind(message.created_at)
            .fetch_one(self.conn())
            .await
            .map_err(map_err)?;
        message_from_row(&row)
    }

    async fn get_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let sql = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.conn()).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn lock_message(&mut self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let sql = format!("SELECT {} FROM messages WHERE id = $1 FOR UPDATE", MESSAGE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.conn()).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn update_message_body(
        &mut self,
        id: Uuid,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET body = $2, edited_at = $3 WHERE id = $1")
            .bind(id)
            .bind(body)
            .bind(edited_at)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn soft_delete_messages(
        &mut self,
        ids: &[Uuid],
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted_at = $3, deleted_by = $2
            WHERE id = ANY($1) AND deleted_at IS NULL
            "#,
        )
        .bind(ids)
        .bind(deleted_by)
        .bind(deleted_at)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_reply_ids(&mut self, parent_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM messages WHERE parent_id = $1 AND deleted_at IS NULL ORDER BY created_at",
        )
        .bind(parent_id)
        .fetch_all(self.conn())
        .await?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("id").map_err(StoreError::from))
            .collect()
    }

    async fn list_channel_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM messages
            WHERE channel_id = $1
              AND parent_id IS NULL
              AND deleted_at IS NULL
              AND ($2::timestamptz IS NULL OR created_at > $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id)
            .bind(range.since)
            .bind(range.until)
            .bind(range.limit)
            .fetch_all(self.conn())
            .await?;
        map_rows(rows, message_from_row)
    }

    async fn list_replies(&mut self, parent_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            "SELECT {} FROM messages WHERE parent_id = $1 AND deleted_at IS NULL ORDER BY created_at, id",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(parent_id).fetch_all(self.conn()).await?;
        map_rows(rows, message_from_row)
    }

    async fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM messages
            WHERE channel_id = $1
              AND deleted_at IS NULL
              AND ($2::timestamptz IS NULL OR created_at > $2)
            "#,
        )
        .bind(channel_id)
        .bind(after)
        .fetch_one(self.conn())
        .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl AttachmentRepository for PgRepos {
    async fn insert_attachment(&mut self, attachment: &Attachment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO attachments (id, message_id, uploader_id, channel_id, file_name, mime_type,
                                     size_bytes, storage_key, status, uploaded_at, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attachment.id)
        .bind(attachment.message_id)
        .bind(attachment.uploader_id)
        .bind(attachment.channel_id)
        .bind(&attachment.file_name)
        .bind(&attachment.mime_type)
        .bind(attachment.size_bytes)
        .bind(&attachment.storage_key)
        .bind(attachment.status.as_str())
        .bind(attachment.uploaded_at)
        .bind(attachment.expires_at)
        .bind(attachment.created_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_attachments(&mut self, ids: &[Uuid]) -> Result<Vec<Attachment>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM attachments WHERE id = ANY($1)", ATTACHMENT_COLUMNS);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(self.conn()).await?;
        map_rows(rows, attachment_from_row)
    }

    async fn bind_attachments(
        &mut self,
        ids: &[Uuid],
        message_id: Uuid,
        uploaded_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE attachments
            SET status = 'attached', message_id = $2, uploaded_at = $3
            WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(ids)
        .bind(message_id)
        .bind(uploaded_at)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_message_attachments(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<Attachment>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM attachments WHERE message_id = ANY($1) ORDER BY created_at",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(message_ids).fetch_all(self.conn()).await?;
        map_rows(rows, attachment_from_row)
    }
}

#[async_trait]
impl MentionRepository for PgRepos {
    async fn insert_user_mentions(
        &mut self,
        message_id: Uuid,
        user_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO message_user_mentions (message_id, user_id, created_at)
            SELECT $1, u, $3 FROM UNNEST($2::uuid[]) AS u
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_ids)
        .bind(at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn insert_group_mentions(
        &mut self,
        message_id: Uuid,
        group_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if group_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO message_group_mentions (message_id, group_id, created_at)
            SELECT $1, g, $3 FROM UNNEST($2::uuid[]) AS g
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(group_ids)
        .bind(at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn delete_mentions(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM message_user_mentions WHERE message_id = $1")
            .bind(message_id)
            .execute(self.conn())
            .await?;
        sqlx::query("DELETE FROM message_group_mentions WHERE message_id = $1")
            .bind(message_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn list_user_mentions(&mut self, message_ids: &[Uuid]) -> Result<Vec<UserMention>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT message_id, user_id, created_at FROM message_user_mentions WHERE message_id = ANY($1) ORDER BY created_at",
        )
        .bind(message_ids)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, |r| {
            Ok(UserMention {
                message_id: r.try_get("message_id")?,
                user_id: r.try_get("user_id")?,
                created_at: r.try_get("created_at")?,
            })
        })
    }

    async fn list_group_mentions(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<GroupMention>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT message_id, group_id, created_at FROM message_group_mentions WHERE message_id = ANY($1) ORDER BY created_at",
        )
        .bind(message_ids)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, |r| {
            Ok(GroupMention {
                message_id: r.try_get("message_id")?,
                group_id: r.try_get("group_id")?,
                created_at: r.try_get("created_at")?,
            })
        })
    }
}

#[async_trait]
impl LinkRepository for PgRepos {
    async fn find_preview_by_url(&mut self, url: &str) -> Result<Option<LinkPreview>, StoreError> {
        let sql = format!("SELECT {} FROM link_previews WHERE url = $1", PREVIEW_COLUMNS);
        let row = sqlx::query(&sql).bind(url).fetch_optional(self.conn()).await?;
        row.as_ref().map(preview_from_row).transpose()
    }

    async fn upsert_preview(&mut self, preview: &LinkPreview) -> Result<LinkPreview, StoreError> {
        // The no-op update makes RETURNING yield the surviving row on conflict
        let sql = format!(
            r#"
            INSERT INTO link_previews (id, url, title, description, image_url, site_name, card_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url
            RETURNING {}
            "#,
            PREVIEW_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(preview.id)
            .bind(&preview.url)
            .bind(&preview.title)
            .bind(&preview.description)
            .bind(&preview.image_url)
            .bind(&preview.site_name)
            .bind(&preview.card_type)
            .bind(preview.created_at)
            .fetch_one(self.conn())
            .await?;
        preview_from_row(&row)
    }

    async fn attach_link(
        &mut self,
        message_id: Uuid,
        link_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO message_links (message_id, link_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(link_id)
        .bind(at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn delete_message_links(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM message_links WHERE message_id = $1")
            .bind(message_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn list_message_links(&mut self, message_ids: &[Uuid]) -> Result<Vec<MessageLink>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT ml.message_id, lp.id, lp.url, lp.title, lp.description, lp.image_url,
                   lp.site_name, lp.card_type, lp.created_at
            FROM message_links ml
            JOIN link_previews lp ON lp.id = ml.link_id
            WHERE ml.message_id = ANY($1)
            ORDER BY ml.created_at
            "#,
        )
        .bind(message_ids)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, |r| {
            Ok(MessageLink {
                message_id: r.try_get("message_id")?,
                link: preview_from_row(r)?,
            })
        })
    }
}

#[async_trait]
impl ReactionRepository for PgRepos {
    async fn insert_reaction(&mut self, reaction: &Reaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reaction.message_id)
        .bind(reaction.user_id)
        .bind(&reaction.emoji)
        .bind(reaction.created_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_reaction(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reactions(&mut self, message_ids: &[Uuid]) -> Result<Vec<Reaction>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT message_id, user_id, emoji, created_at
            FROM message_reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(message_ids)
        .fetch_all(self.conn())
        .await?;
        map_rows(rows, |r| {
            Ok(Reaction {
                message_id: r.try_get("message_id")?,
                user_id: r.try_get("user_id")?,
                emoji: r.try_get("emoji")?,
                created_at: r.try_get("created_at")?,
            })
        })
    }
}

#[async_trait]
impl ReadStateRepository for PgRepos {
    async fn upsert_read_state(&mut self, state: &ChannelReadState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_read_states (channel_id, user_id, last_read_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel_id, user_id)
            DO UPDATE SET last_read_at = EXCLUDED.last_read_at, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.channel_id)
        .bind(state.user_id)
        .bind(state.last_read_at)
        .bind(state.updated_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn get_read_state(
        &mut self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChannelReadState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT channel_id, user_id, last_read_at, updated_at
            FROM channel_read_states
            WHERE channel_id = $1 AND user_id = $2
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.conn())
        .await?;

        row.map(|r| -> Result<ChannelReadState, StoreError> {
            Ok(ChannelReadState {
                channel_id: r.try_get("channel_id")?,
                user_id: r.try_get("user_id")?,
                last_read_at: r.try_get("last_read_at")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ThreadRepository for PgRepos {
    async fn get_thread_metadata(&mut self, message_id: Uuid) -> Result<Option<ThreadMetadata>, StoreError> {
        let sql = format!("SELECT {} FROM thread_metadata WHERE message_id = $1", THREAD_COLUMNS);
        let row = sqlx::query(&sql).bind(message_id).fetch_optional(self.conn()).await?;
        row.as_ref().map(thread_from_row).transpose()
    }

    async fn list_thread_metadata(
        &mut self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ThreadMetadata>, StoreError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM thread_metadata WHERE message_id = ANY($1)",
            THREAD_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(message_ids).fetch_all(self.conn()).await?;
        map_rows(rows, thread_from_row)
    }

    async fn save_thread_metadata(&mut self, metadata: &ThreadMetadata) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO thread_metadata (message_id, reply_count, last_reply_at, last_reply_user_id,
                                         participant_ids, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (message_id) DO UPDATE SET
                reply_count = EXCLUDED.reply_count,
                last_reply_at = EXCLUDED.last_reply_at,
                last_reply_user_id = EXCLUDED.last_reply_user_id,
                participant_ids = EXCLUDED.participant_ids,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(metadata.message_id)
        .bind(metadata.reply_count)
        .bind(metadata.last_reply_at)
        .bind(metadata.last_reply_user_id)
        .bind(&metadata.participant_ids)
        .bind(metadata.created_at)
        .bind(metadata.updated_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn delete_thread_metadata(&mut self, message_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM thread_metadata WHERE message_id = $1")
            .bind(message_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn follow_thread(
        &mut self,
        user_id: Uuid,
        thread_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_thread_follows (user_id, thread_id, followed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(thread_id)
        .bind(at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn list_thread_followers(&mut self, thread_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id FROM user_thread_follows WHERE thread_id = $1 ORDER BY followed_at",
        )
        .bind(thread_id)
        .fetch_all(self.conn())
        .await?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("user_id").map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl SystemMessageRepository for PgRepos {
    async fn insert_system_message(&mut self, message: &SystemMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO system_messages (id, channel_id, kind, payload, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.channel_id)
        .bind(message.kind.as_str())
        .bind(&message.payload)
        .bind(message.actor_id)
        .bind(message.created_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn list_system_messages(
        &mut self,
        channel_id: Uuid,
        range: MessageRange,
    ) -> Result<Vec<SystemMessage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, channel_id, kind, payload, actor_id, created_at
            FROM system_messages
            WHERE channel_id = $1
              AND ($2::timestamptz IS NULL OR created_at > $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(channel_id)
        .bind(range.since)
        .bind(range.until)
        .bind(range.limit)
        .fetch_all(self.conn())
        .await?;

        map_rows(rows, |r| {
            Ok(SystemMessage {
                id: r.try_get("id")?,
                channel_id: r.try_get("channel_id")?,
                kind: parse_enum(r, "kind")?,
                payload: r.try_get("payload")?,
                actor_id: r.try_get("actor_id")?,
                created_at: r.try_get("created_at")?,
            })
        })
    }
}

#[async_trait]
impl SessionRepository for PgRepos {
    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(session.created_at)
        .execute(self.conn())
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, refresh_token_hash, expires_at, revoked_at, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;

        row.map(|r| -> Result<Session, StoreError> {
            Ok(Session {
                id: r.try_get("id")?,
                user_id: r.try_get("user_id")?,
                refresh_token_hash: r.try_get("refresh_token_hash")?,
                expires_at: r.try_get("expires_at")?,
                revoked_at: r.try_get("revoked_at")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }
}
