/**
 * WebSocket Connection Handler
 *
 * `GET /ws?workspaceId=<id>&token=<jwt>` upgrades to a socket bound to one
 * user in one workspace. The token may also come from
 * `Authorization: Bearer`.
 *
 * # Lifecycle
 *
 * 1. Validate the token (401), require `workspaceId` (400) and workspace
 *    membership (403), all before the upgrade
 * 2. Register a [`Client`] with the hub
 * 3. Run the read pump on this task and the write pump on its own task
 * 4. Whichever pump ends first tears the connection down and unregisters
 *
 * # Pumps
 *
 * The read pump parses each text frame and answers through the write pump
 * with an `ack` or an `error` frame. Any inbound frame resets the idle
 * deadline (`pong_wait`). The write pump drains the hub queue and direct
 * replies, bounds every write by `write_wait`, and pings every
 * `ping_period`.
 */
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use crate::backend::access::{ensure_access, ensure_workspace_member};
use crate::backend::auth::{authenticate, AuthenticatedUser};
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::middleware::bearer_token;
use crate::backend::realtime::hub::{next_client_id, BroadcastMessage, Client, ClientId, HubHandle, Subscription};
use crate::backend::server::state::AppState;
use crate::backend::store::prelude::*;
use crate::shared::config::RealtimeSettings;
use crate::shared::event::{ClientFrame, ServerFrame, TypingEnvelope};

/// Direct replies (acks and errors) waiting for the write pump
const REPLY_QUEUE_CAPACITY: usize = 32;

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub workspace_id: Option<String>,
    pub token: Option<String>,
}

/// Upgrade handler for `/ws`
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, BackendError> {
    let (user, workspace_id) = authorize_upgrade(&state, &headers, &params).await?;
    let max_size = state.config.realtime.max_message_size;

    Ok(ws
        .max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| run_connection(socket, state, user, workspace_id)))
}

/// Authenticate the caller and check workspace membership
///
/// Returns the caller and the workspace the socket is bound to.
pub async fn authorize_upgrade(
    state: &AppState,
    headers: &HeaderMap,
    params: &ConnectParams,
) -> BackendResult<(AuthenticatedUser, String)> {
    let token = bearer_token(headers)
        .or(params.token.as_deref())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BackendError::unauthenticated("missing bearer token"))?;

    let user = authenticate(state.store.as_ref(), &state.keys, token).await?;

    let workspace_id = params
        .workspace_id
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| BackendError::validation("workspaceId: query parameter is required"))?;

    let mut repos = state.store.connect().await?;
    if repos.get_workspace(workspace_id).await?.is_none() {
        return Err(BackendError::workspace_not_found());
    }
    ensure_workspace_member(repos.as_mut(), workspace_id, user.user_id).await?;

    Ok((user, workspace_id.to_string()))
}

async fn run_connection(socket: WebSocket, state: AppState, user: AuthenticatedUser, workspace_id: String) {
    let settings = state.config.realtime.clone();
    let (queue_tx, queue_rx) = mpsc::channel::<Arc<str>>(settings.client_queue_capacity);
    let (reply_tx, reply_rx) = mpsc::channel::<ServerFrame>(REPLY_QUEUE_CAPACITY);
    let closed = Arc::new(Notify::new());

    let client = Client {
        id: next_client_id(),
        user_id: user.user_id,
        workspace_id: workspace_id.clone(),
        sender: queue_tx,
        closed: closed.clone(),
    };
    let key = client.key();
    state.hub.register(client).await;

    tracing::info!(
        client_id = key.client_id,
        user_id = %user.user_id,
        workspace_id = %workspace_id,
        "[WS] Client connected"
    );

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, queue_rx, reply_rx, closed.clone(), settings.clone()));
    let mut session = ConnectionSession::new(
        key.client_id,
        user.user_id,
        workspace_id,
        state.store.clone(),
        state.hub.clone(),
    );

    let reader_finished = tokio::select! {
        _ = read_pump(stream, &mut session, reply_tx, settings.pong_wait) => true,
        _ = &mut writer => false,
    };

    state.hub.unregister(key.clone()).await;
    if reader_finished {
        closed.notify_one();
        if let Err(e) = writer.await {
            tracing::warn!(client_id = key.client_id, "[WS] Write pump failed: {}", e);
        }
    }

    tracing::info!(
        client_id = key.client_id,
        user_id = %key.user_id,
        joined = session.joined().len(),
        "[WS] Client disconnected"
    );
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    session: &mut ConnectionSession,
    replies: mpsc::Sender<ServerFrame>,
    pong_wait: Duration,
) {
    loop {
        let message = match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                tracing::info!(client_id = session.client_id, "[WS] Idle deadline passed");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(client_id = session.client_id, "[WS] Read failed: {}", e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let reply = match message {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(_) => ServerFrame::error("unsupported_frame", "binary frames are not supported"),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        if replies.send(reply).await.is_err() {
            break;
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Arc<str>>,
    mut replies: mpsc::Receiver<ServerFrame>,
    closed: Arc<Notify>,
    settings: RealtimeSettings,
) {
    let mut ping = tokio::time::interval(settings.ping_period().max(Duration::from_secs(1)));
    // The first tick completes immediately
    ping.tick().await;

    loop {
        let outbound = tokio::select! {
            _ = closed.notified() => break,
            payload = queue.recv() => match payload {
                Some(payload) => Message::Text(payload.to_string().into()),
                None => break,
            },
            frame = replies.recv() => match frame {
                Some(frame) => match frame.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!("[WS] Failed to encode reply: {}", e);
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(settings.write_wait, sink.send(outbound)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("[WS] Write failed: {}", e);
                break;
            }
            Err(_) => {
                tracing::warn!("[WS] Write deadline passed, closing");
                break;
            }
        }
    }

    let _ = timeout(settings.write_wait, sink.close()).await;
}

/// Per-socket protocol state: who is connected and which channels they joined
pub struct ConnectionSession {
    client_id: ClientId,
    user_id: Uuid,
    workspace_id: String,
    joined: HashSet<Uuid>,
    store: Arc<dyn Store>,
    hub: HubHandle,
}

impl ConnectionSession {
    pub fn new(client_id: ClientId, user_id: Uuid, workspace_id: String, store: Arc<dyn Store>, hub: HubHandle) -> Self {
        Self {
            client_id,
            user_id,
            workspace_id,
            joined: HashSet::new(),
            store,
            hub,
        }
    }

    pub fn joined(&self) -> &HashSet<Uuid> {
        &self.joined
    }

    /// Parse and dispatch one text frame, returning the reply for this client
    pub async fn handle_text(&mut self, text: &str) -> ServerFrame {
        match ClientFrame::parse(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => error_frame(&BackendError::from(e)),
        }
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> ServerFrame {
        let kind = frame.kind();
        match self.dispatch(frame).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(
                    client_id = self.client_id,
                    frame = kind,
                    code = e.code(),
                    "[WS] Frame rejected"
                );
                error_frame(&e)
            }
        }
    }

    async fn dispatch(&mut self, frame: ClientFrame) -> BackendResult<ServerFrame> {
        let kind = frame.kind();
        match frame {
            ClientFrame::JoinChannel(channel) => {
                self.join(channel.channel_id).await?;
                Ok(ServerFrame::ack(kind, Some(channel.channel_id), None))
            }
            ClientFrame::LeaveChannel(channel) => {
                // Leaving drops the user's subscription for all of their sessions
                self.joined.remove(&channel.channel_id);
                self.hub.unsubscribe(self.subscription(channel.channel_id)).await;
                Ok(ServerFrame::ack(kind, Some(channel.channel_id), None))
            }
            ClientFrame::Typing(channel) => {
                if !self.joined.contains(&channel.channel_id) {
                    return Err(BackendError::channel_not_joined());
                }
                let frame = ServerFrame::Typing(TypingEnvelope {
                    channel_id: channel.channel_id,
                    user_id: self.user_id,
                });
                let payload = frame.to_json()?;
                self.hub
                    .broadcast(
                        BroadcastMessage::to_channel(&self.workspace_id, channel.channel_id, payload)
                            .excluding(self.user_id),
                    )
                    .await;
                Ok(ServerFrame::ack(kind, Some(channel.channel_id), None))
            }
            ClientFrame::PostMessage(intent) => {
                tracing::debug!(
                    client_id = self.client_id,
                    channel_id = %intent.channel_id,
                    "[WS] Post intent"
                );
                Ok(ServerFrame::ack(kind, Some(intent.channel_id), intent.client_msg_id))
            }
            ClientFrame::UpdateReadState(intent) => {
                tracing::debug!(
                    client_id = self.client_id,
                    channel_id = %intent.channel_id,
                    last_read_at = %intent.last_read_at,
                    "[WS] Read-state intent"
                );
                Ok(ServerFrame::ack(kind, Some(intent.channel_id), None))
            }
        }
    }

    async fn join(&mut self, channel_id: Uuid) -> BackendResult<()> {
        {
            let mut repos = self.store.connect().await?;
            let channel = ensure_access(repos.as_mut(), channel_id, self.user_id).await?;
            if channel.workspace_id != self.workspace_id {
                return Err(BackendError::channel_not_found());
            }
        }

        if self.joined.insert(channel_id) {
            self.hub.subscribe(self.subscription(channel_id)).await;
            tracing::debug!(
                client_id = self.client_id,
                channel_id = %channel_id,
                "[WS] Joined channel"
            );
        }
        Ok(())
    }

    fn subscription(&self, channel_id: Uuid) -> Subscription {
        Subscription {
            user_id: self.user_id,
            workspace_id: self.workspace_id.clone(),
            channel_id,
        }
    }
}

fn error_frame(err: &BackendError) -> ServerFrame {
    ServerFrame::error(err.code(), err.public_message())
}
