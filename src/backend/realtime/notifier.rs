//! Notification Adapter
//!
//! The only path from the message pipeline to live sockets. Use cases call a
//! [`Notifier`] after their transaction has committed; [`HubNotifier`] turns
//! each call into a wire frame and hands it to the hub.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::backend::realtime::hub::{BroadcastMessage, HubHandle};
use crate::shared::event::{DeletedEnvelope, MessageEnvelope, ServerFrame, UnreadCountEnvelope};
use crate::shared::message::MessageView;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView);

    async fn notify_updated(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView);

    /// `message_ids` includes cascaded thread replies
    async fn notify_deleted(&self, workspace_id: &str, channel_id: Uuid, message_ids: &[Uuid]);

    /// Sent to every live session of `user_id`, joined to the channel or not
    async fn notify_unread_count(&self, workspace_id: &str, user_id: Uuid, channel_id: Uuid, count: i64);
}

/// Delivers notifications through the fan-out hub
#[derive(Debug, Clone)]
pub struct HubNotifier {
    hub: HubHandle,
}

impl HubNotifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    async fn send(&self, message: Option<BroadcastMessage>) {
        if let Some(message) = message {
            self.hub.broadcast(message).await;
        }
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match frame.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("[Notifier] Failed to encode frame: {}", e);
            None
        }
    }
}

#[async_trait]
impl Notifier for HubNotifier {
    async fn notify_new(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView) {
        let frame = ServerFrame::NewMessage(MessageEnvelope {
            channel_id,
            message: message.clone(),
        });
        self.send(encode(&frame).map(|json| BroadcastMessage::to_channel(workspace_id, channel_id, json)))
            .await;
    }

    async fn notify_updated(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView) {
        let frame = ServerFrame::MessageUpdated(MessageEnvelope {
            channel_id,
            message: message.clone(),
        });
        self.send(encode(&frame).map(|json| BroadcastMessage::to_channel(workspace_id, channel_id, json)))
            .await;
    }

    async fn notify_deleted(&self, workspace_id: &str, channel_id: Uuid, message_ids: &[Uuid]) {
        let frame = ServerFrame::MessageDeleted(DeletedEnvelope {
            channel_id,
            message_ids: message_ids.to_vec(),
        });
        self.send(encode(&frame).map(|json| BroadcastMessage::to_channel(workspace_id, channel_id, json)))
            .await;
    }

    async fn notify_unread_count(&self, workspace_id: &str, user_id: Uuid, channel_id: Uuid, count: i64) {
        let frame = ServerFrame::UnreadCount(UnreadCountEnvelope { channel_id, count });
        self.send(encode(&frame).map(|json| BroadcastMessage::to_user(workspace_id, user_id, json)))
            .await;
    }
}

/// One recorded notifier call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub workspace_id: String,
    /// Set for user-targeted frames
    pub user_id: Option<Uuid>,
    pub frame: ServerFrame,
}

/// Notifier that keeps every call in memory, for tests
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    calls: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Wire type names of the recorded frames, in call order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.notifications()
            .iter()
            .map(|n| match n.frame {
                ServerFrame::NewMessage(_) => "new_message",
                ServerFrame::MessageUpdated(_) => "message_updated",
                ServerFrame::MessageDeleted(_) => "message_deleted",
                ServerFrame::UnreadCount(_) => "unread_count",
                ServerFrame::Typing(_) => "typing",
                ServerFrame::Ack(_) => "ack",
                ServerFrame::Error(_) => "error",
            })
            .collect()
    }

    fn record(&self, workspace_id: &str, user_id: Option<Uuid>, frame: ServerFrame) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Notification {
                workspace_id: workspace_id.to_string(),
                user_id,
                frame,
            });
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_new(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView) {
        self.record(
            workspace_id,
            None,
            ServerFrame::NewMessage(MessageEnvelope {
                channel_id,
                message: message.clone(),
            }),
        );
    }

    async fn notify_updated(&self, workspace_id: &str, channel_id: Uuid, message: &MessageView) {
        self.record(
            workspace_id,
            None,
            ServerFrame::MessageUpdated(MessageEnvelope {
                channel_id,
                message: message.clone(),
            }),
        );
    }

    async fn notify_deleted(&self, workspace_id: &str, channel_id: Uuid, message_ids: &[Uuid]) {
        self.record(
            workspace_id,
            None,
            ServerFrame::MessageDeleted(DeletedEnvelope {
                channel_id,
                message_ids: message_ids.to_vec(),
            }),
        );
    }

    async fn notify_unread_count(&self, workspace_id: &str, user_id: Uuid, channel_id: Uuid, count: i64) {
        self.record(
            workspace_id,
            Some(user_id),
            ServerFrame::UnreadCount(UnreadCountEnvelope { channel_id, count }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::realtime::hub::{next_client_id, Client, Subscription};
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    #[tokio::test]
    async fn test_hub_notifier_sends_deleted_frame_to_subscribers() {
        let hub = HubHandle::spawn(16);
        let notifier = HubNotifier::new(hub.clone());
        let channel_id = Uuid::new_v4();
        let (sender, mut rx) = mpsc::channel(8);
        let client = Client {
            id: next_client_id(),
            user_id: Uuid::new_v4(),
            workspace_id: "acme".to_string(),
            sender,
            closed: Arc::new(Notify::new()),
        };
        hub.register(client.clone()).await;
        hub.subscribe(Subscription {
            user_id: client.user_id,
            workspace_id: "acme".to_string(),
            channel_id,
        })
        .await;

        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        notifier.notify_deleted("acme", channel_id, &ids).await;

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["type"], "message_deleted");
        assert_eq!(json["payload"]["messageIds"][1], ids[1].to_string());
    }

    #[tokio::test]
    async fn test_unread_count_targets_user_without_subscription() {
        let hub = HubHandle::spawn(16);
        let notifier = HubNotifier::new(hub.clone());
        let user_id = Uuid::new_v4();
        let (sender, mut rx) = mpsc::channel(8);
        hub.register(Client {
            id: next_client_id(),
            user_id,
            workspace_id: "acme".to_string(),
            sender,
            closed: Arc::new(Notify::new()),
        })
        .await;

        notifier.notify_unread_count("acme", user_id, Uuid::new_v4(), 3).await;

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["type"], "unread_count");
        assert_eq!(json["payload"]["count"], 3);
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify_deleted("acme", Uuid::new_v4(), &[Uuid::new_v4()]).await;
        assert_eq!(notifier.kinds(), vec!["message_deleted"]);
        assert_eq!(notifier.notifications()[0].workspace_id, "acme");
    }
}
