//! Messaging HTTP Handlers
//!
//! Thin axum adapters over [`MessagePipeline`] and [`ReadStateEngine`]. The
//! caller comes from [`AuthUser`]; malformed paths, query strings and bodies
//! become `validation_error` responses with the usual JSON error body.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::messaging::pipeline::{CreateMessage, ListQuery, MessagePipeline};
use crate::backend::messaging::read_state::ReadStateEngine;
use crate::backend::middleware::AuthUser;
use crate::shared::message::{
    AddReactionRequest, AllUnreadView, CreateMessageRequest, MessageListView, MessageView,
    ReadStateView, ThreadDetailView, UnreadCountView, UpdateMessageRequest, UpdateReadStateRequest,
};
use crate::shared::validation::parse_rfc3339;

/// Raw timeline query; parsed by hand so bad values get our error body
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl ListParams {
    fn into_query(self) -> BackendResult<ListQuery> {
        let limit = self
            .limit
            .map(|raw| {
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| BackendError::validation("limit: must be an integer"))
            })
            .transpose()?;
        let since = self.since.map(|s| parse_rfc3339("since", &s)).transpose()?;
        let until = self.until.map(|s| parse_rfc3339("until", &s)).transpose()?;
        Ok(ListQuery { limit, since, until })
    }
}

fn path<T>(extracted: Result<Path<T>, PathRejection>) -> BackendResult<T> {
    extracted
        .map(|Path(value)| value)
        .map_err(|e| BackendError::validation(format!("path: {}", e.body_text())))
}

fn body<T>(extracted: Result<Json<T>, JsonRejection>) -> BackendResult<T> {
    extracted
        .map(|Json(value)| value)
        .map_err(|e| BackendError::validation(format!("body: {}", e.body_text())))
}

/// `POST /api/channels/{cid}/messages`
pub async fn create_message(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    channel_id: Result<Path<Uuid>, PathRejection>,
    request: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> BackendResult<(StatusCode, Json<MessageView>)> {
    let channel_id = path(channel_id)?;
    let request = body(request)?;

    let view = pipeline
        .create(CreateMessage {
            channel_id,
            user_id: user.user_id,
            body: request.body,
            parent_id: request.parent_id,
            attachment_ids: request.attachment_ids,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/channels/{cid}/messages?limit=&since=&until=`
pub async fn list_messages(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    channel_id: Result<Path<Uuid>, PathRejection>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> BackendResult<Json<MessageListView>> {
    let channel_id = path(channel_id)?;
    let Query(params) = params.map_err(|e| BackendError::validation(format!("query: {}", e.body_text())))?;

    let page = pipeline
        .list(channel_id, user.user_id, params.into_query()?)
        .await?;
    Ok(Json(page))
}

/// `PATCH /api/messages/{mid}`
pub async fn update_message(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    message_id: Result<Path<Uuid>, PathRejection>,
    request: Result<Json<UpdateMessageRequest>, JsonRejection>,
) -> BackendResult<Json<MessageView>> {
    let message_id = path(message_id)?;
    let request = body(request)?;

    let view = pipeline.update(message_id, user.user_id, request.body).await?;
    Ok(Json(view))
}

/// `DELETE /api/messages/{mid}`
pub async fn delete_message(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    message_id: Result<Path<Uuid>, PathRejection>,
) -> BackendResult<StatusCode> {
    let message_id = path(message_id)?;
    pipeline.delete(message_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/messages/{mid}/thread`
pub async fn get_thread(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    message_id: Result<Path<Uuid>, PathRejection>,
) -> BackendResult<Json<ThreadDetailView>> {
    let message_id = path(message_id)?;
    Ok(Json(pipeline.get_thread(message_id, user.user_id).await?))
}

/// `POST /api/messages/{mid}/reactions`
pub async fn add_reaction(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    message_id: Result<Path<Uuid>, PathRejection>,
    request: Result<Json<AddReactionRequest>, JsonRejection>,
) -> BackendResult<(StatusCode, Json<MessageView>)> {
    let message_id = path(message_id)?;
    let request = body(request)?;

    let view = pipeline
        .add_reaction(message_id, user.user_id, &request.emoji)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `DELETE /api/messages/{mid}/reactions/{emoji}`
pub async fn remove_reaction(
    State(pipeline): State<MessagePipeline>,
    AuthUser(user): AuthUser,
    params: Result<Path<(Uuid, String)>, PathRejection>,
) -> BackendResult<StatusCode> {
    let (message_id, emoji) = path(params)?;
    pipeline
        .remove_reaction(message_id, user.user_id, &emoji)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/channels/{cid}/reads`
pub async fn update_read_state(
    State(read_state): State<ReadStateEngine>,
    AuthUser(user): AuthUser,
    channel_id: Result<Path<Uuid>, PathRejection>,
    request: Result<Json<UpdateReadStateRequest>, JsonRejection>,
) -> BackendResult<Json<ReadStateView>> {
    let channel_id = path(channel_id)?;
    let request = body(request)?;
    let last_read_at = parse_rfc3339("lastReadAt", &request.last_read_at)?;

    let view = read_state
        .update_read_state(channel_id, user.user_id, last_read_at)
        .await?;
    Ok(Json(view))
}

/// `GET /api/channels/{cid}/unread_count`
pub async fn unread_count(
    State(read_state): State<ReadStateEngine>,
    AuthUser(user): AuthUser,
    channel_id: Result<Path<Uuid>, PathRejection>,
) -> BackendResult<Json<UnreadCountView>> {
    let channel_id = path(channel_id)?;
    let count = read_state.get_unread_count(channel_id, user.user_id).await?;
    Ok(Json(UnreadCountView { count }))
}

/// `GET /api/unread`
pub async fn all_unread(
    State(read_state): State<ReadStateEngine>,
    AuthUser(user): AuthUser,
) -> BackendResult<Json<AllUnreadView>> {
    Ok(Json(read_state.get_all_unread(user.user_id).await?))
}
