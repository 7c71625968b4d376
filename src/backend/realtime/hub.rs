/**
 * Fan-out Hub
 *
 * Single-process broker holding live socket clients and their channel
 * subscriptions. [`Hub`] is the state machine; [`HubHandle`] is the cloneable
 * front door whose queues feed one event loop task, so the maps are only
 * ever touched from that task.
 *
 * # State
 *
 * - `workspaces`: workspace id → user id → live clients of that user
 * - `subscriptions`: workspace id → channel id → user ids that joined it
 *
 * Subscriptions are tracked per user: once any session of a user joins a
 * channel, every live session of that user receives its events. They are torn
 * down on leave, or when the user's last client in the workspace disconnects.
 *
 * # Slow consumers
 *
 * Enqueueing to a client never waits. A full outbound queue closes the
 * client instead of blocking delivery to everyone else.
 */
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new socket client
pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One live socket session as the hub sees it
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub user_id: Uuid,
    pub workspace_id: String,
    /// Outbound queue drained by the connection's write pump
    pub sender: mpsc::Sender<Arc<str>>,
    /// Signalled when the hub drops the client
    pub closed: Arc<Notify>,
}

impl Client {
    pub fn key(&self) -> ClientKey {
        ClientKey {
            client_id: self.id,
            user_id: self.user_id,
            workspace_id: self.workspace_id.clone(),
        }
    }
}

/// Identifies a registered client for removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey {
    pub client_id: ClientId,
    pub user_id: Uuid,
    pub workspace_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: Uuid,
    pub workspace_id: String,
    pub channel_id: Uuid,
}

/// A serialized frame and who should get it
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub workspace_id: String,
    /// Only clients subscribed to this channel, when set
    pub channel_id: Option<Uuid>,
    pub exclude_user: Option<Uuid>,
    /// Only this user's clients, when set
    pub target_user: Option<Uuid>,
    pub payload: Arc<str>,
}

impl BroadcastMessage {
    pub fn to_channel(workspace_id: &str, channel_id: Uuid, payload: impl Into<Arc<str>>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            channel_id: Some(channel_id),
            exclude_user: None,
            target_user: None,
            payload: payload.into(),
        }
    }

    pub fn to_user(workspace_id: &str, user_id: Uuid, payload: impl Into<Arc<str>>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            channel_id: None,
            exclude_user: None,
            target_user: Some(user_id),
            payload: payload.into(),
        }
    }

    pub fn excluding(mut self, user_id: Uuid) -> Self {
        self.exclude_user = Some(user_id);
        self
    }
}

/// Result of one broadcast
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub closed: Vec<ClientId>,
}

#[derive(Debug, Default)]
pub struct Hub {
    workspaces: HashMap<String, HashMap<Uuid, Vec<Client>>>,
    subscriptions: HashMap<String, HashMap<Uuid, HashSet<Uuid>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Client) {
        tracing::debug!(
            client_id = client.id,
            user_id = %client.user_id,
            workspace_id = %client.workspace_id,
            "[Hub] Client registered"
        );
        self.workspaces
            .entry(client.workspace_id.clone())
            .or_default()
            .entry(client.user_id)
            .or_default()
            .push(client);
    }

    /// Remove a client; returns whether it was present
    ///
    /// The user's subscriptions in the workspace go with their last client.
    pub fn unregister(&mut self, key: &ClientKey) -> bool {
        let mut removed = false;
        let mut last_client = false;
        if let Some(users) = self.workspaces.get_mut(&key.workspace_id) {
            if let Some(clients) = users.get_mut(&key.user_id) {
                let before = clients.len();
                clients.retain(|c| c.id != key.client_id);
                removed = clients.len() != before;
                if clients.is_empty() {
                    users.remove(&key.user_id);
                    last_client = true;
                }
            }
            if users.is_empty() {
                self.workspaces.remove(&key.workspace_id);
            }
        }

        if last_client {
            if let Some(channels) = self.subscriptions.get_mut(&key.workspace_id) {
                channels.retain(|_, users| {
                    users.remove(&key.user_id);
                    !users.is_empty()
                });
                if channels.is_empty() {
                    self.subscriptions.remove(&key.workspace_id);
                }
            }
        }

        if removed {
            tracing::debug!(client_id = key.client_id, "[Hub] Client unregistered");
        }
        removed
    }

    pub fn subscribe(&mut self, sub: Subscription) {
        self.subscriptions
            .entry(sub.workspace_id)
            .or_default()
            .entry(sub.channel_id)
            .or_default()
            .insert(sub.user_id);
    }

    pub fn unsubscribe(&mut self, sub: &Subscription) {
        if let Some(channels) = self.subscriptions.get_mut(&sub.workspace_id) {
            if let Some(users) = channels.get_mut(&sub.channel_id) {
                users.remove(&sub.user_id);
                if users.is_empty() {
                    channels.remove(&sub.channel_id);
                }
            }
            if channels.is_empty() {
                self.subscriptions.remove(&sub.workspace_id);
            }
        }
    }

    /// Enqueue `message` to every matching client without waiting
    pub fn broadcast(&mut self, message: &BroadcastMessage) -> Delivery {
        let mut delivery = Delivery::default();
        let subscribers = message.channel_id.map(|channel_id| {
            self.subscriptions
                .get(&message.workspace_id)
                .and_then(|channels| channels.get(&channel_id))
        });

        let mut to_close: Vec<Client> = Vec::new();
        if let Some(users) = self.workspaces.get(&message.workspace_id) {
            for (user_id, clients) in users {
                if message.exclude_user == Some(*user_id) {
                    continue;
                }
                if message.target_user.is_some_and(|target| target != *user_id) {
                    continue;
                }
                if let Some(subscribed) = subscribers {
                    if !subscribed.is_some_and(|set| set.contains(user_id)) {
                        continue;
                    }
                }
                for client in clients {
                    match client.sender.try_send(Arc::clone(&message.payload)) {
                        Ok(()) => delivery.delivered += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(
                                client_id = client.id,
                                user_id = %client.user_id,
                                "[Hub] Outbound queue full, closing slow client"
                            );
                            to_close.push(client.clone());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            to_close.push(client.clone());
                        }
                    }
                }
            }
        }

        for client in to_close {
            self.unregister(&client.key());
            client.closed.notify_one();
            delivery.closed.push(client.id);
        }
        delivery
    }

    pub fn client_count(&self) -> usize {
        self.workspaces
            .values()
            .flat_map(|users| users.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_subscribed(&self, workspace_id: &str, channel_id: Uuid, user_id: Uuid) -> bool {
        self.subscriptions
            .get(workspace_id)
            .and_then(|channels| channels.get(&channel_id))
            .is_some_and(|users| users.contains(&user_id))
    }
}

/// Cloneable handle to a running hub event loop
#[derive(Debug, Clone)]
pub struct HubHandle {
    register: mpsc::Sender<Client>,
    unregister: mpsc::Sender<ClientKey>,
    subscribe: mpsc::Sender<Subscription>,
    unsubscribe: mpsc::Sender<Subscription>,
    broadcast: mpsc::Sender<BroadcastMessage>,
}

impl HubHandle {
    /// Start the event loop on its own task
    ///
    /// The loop ends once every handle has been dropped.
    pub fn spawn(queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let (register, register_rx) = mpsc::channel(capacity);
        let (unregister, unregister_rx) = mpsc::channel(capacity);
        let (subscribe, subscribe_rx) = mpsc::channel(capacity);
        let (unsubscribe, unsubscribe_rx) = mpsc::channel(capacity);
        let (broadcast, broadcast_rx) = mpsc::channel(capacity);

        tokio::spawn(run(
            Hub::new(),
            HubQueues {
                register: register_rx,
                unregister: unregister_rx,
                subscribe: subscribe_rx,
                unsubscribe: unsubscribe_rx,
                broadcast: broadcast_rx,
            },
        ));

        Self {
            register,
            unregister,
            subscribe,
            unsubscribe,
            broadcast,
        }
    }

    pub async fn register(&self, client: Client) {
        if self.register.send(client).await.is_err() {
            tracing::warn!("[Hub] Event loop stopped; register dropped");
        }
    }

    pub async fn unregister(&self, key: ClientKey) {
        if self.unregister.send(key).await.is_err() {
            tracing::warn!("[Hub] Event loop stopped; unregister dropped");
        }
    }

    pub async fn subscribe(&self, sub: Subscription) {
        if self.subscribe.send(sub).await.is_err() {
            tracing::warn!("[Hub] Event loop stopped; subscribe dropped");
        }
    }

    pub async fn unsubscribe(&self, sub: Subscription) {
        if self.unsubscribe.send(sub).await.is_err() {
            tracing::warn!("[Hub] Event loop stopped; unsubscribe dropped");
        }
    }

    pub async fn broadcast(&self, message: BroadcastMessage) {
        if self.broadcast.send(message).await.is_err() {
            tracing::warn!("[Hub] Event loop stopped; broadcast dropped");
        }
    }
}

struct HubQueues {
    register: mpsc::Receiver<Client>,
    unregister: mpsc::Receiver<ClientKey>,
    subscribe: mpsc::Receiver<Subscription>,
    unsubscribe: mpsc::Receiver<Subscription>,
    broadcast: mpsc::Receiver<BroadcastMessage>,
}

async fn run(mut hub: Hub, mut queues: HubQueues) {
    tracing::info!("[Hub] Event loop started");
    loop {
        // Membership changes first, so a join or leave queued before a
        // broadcast takes effect before that broadcast
        tokio::select! {
            biased;
            Some(client) = queues.register.recv() => hub.register(client),
            Some(key) = queues.unregister.recv() => {
                hub.unregister(&key);
            }
            Some(sub) = queues.subscribe.recv() => hub.subscribe(sub),
            Some(sub) = queues.unsubscribe.recv() => hub.unsubscribe(&sub),
            Some(message) = queues.broadcast.recv() => {
                let delivery = hub.broadcast(&message);
                tracing::trace!(
                    delivered = delivery.delivered,
                    closed = delivery.closed.len(),
                    "[Hub] Broadcast"
                );
            }
            else => break,
        }
    }
    tracing::info!("[Hub] Event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WS: &str = "acme";

    fn client(user_id: Uuid, capacity: usize) -> (Client, mpsc::Receiver<Arc<str>>) {
        let (sender, rx) = mpsc::channel(capacity);
        let client = Client {
            id: next_client_id(),
            user_id,
            workspace_id: WS.to_string(),
            sender,
            closed: Arc::new(Notify::new()),
        };
        (client, rx)
    }

    fn sub(client: &Client, channel_id: Uuid) -> Subscription {
        Subscription {
            user_id: client.user_id,
            workspace_id: WS.to_string(),
            channel_id,
        }
    }

    #[test]
    fn test_channel_broadcast_reaches_subscribers_only() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let (joined, mut joined_rx) = client(Uuid::new_v4(), 8);
        let (idle, mut idle_rx) = client(Uuid::new_v4(), 8);
        hub.register(joined.clone());
        hub.register(idle.clone());
        hub.subscribe(sub(&joined, channel));

        let delivery = hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "hello"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(joined_rx.try_recv().unwrap().as_ref(), "hello");
        assert!(idle_rx.try_recv().is_err());
    }

    #[test]
    fn test_leave_and_disconnect_stop_delivery() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let (leaver, mut leaver_rx) = client(Uuid::new_v4(), 8);
        let (gone, mut gone_rx) = client(Uuid::new_v4(), 8);
        hub.register(leaver.clone());
        hub.register(gone.clone());
        hub.subscribe(sub(&leaver, channel));
        hub.subscribe(sub(&gone, channel));

        hub.unsubscribe(&sub(&leaver, channel));
        assert!(!hub.is_subscribed(WS, channel, leaver.user_id));
        assert!(hub.unregister(&gone.key()));
        assert!(!hub.is_subscribed(WS, channel, gone.user_id));

        let delivery = hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "late"));
        assert_eq!(delivery.delivered, 0);
        assert!(leaver_rx.try_recv().is_err());
        assert!(gone_rx.try_recv().is_err());
    }

    #[test]
    fn test_exclude_and_target_user() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let typist = Uuid::new_v4();
        let (typist_a, mut typist_a_rx) = client(typist, 8);
        let (typist_b, mut typist_b_rx) = client(typist, 8);
        let (other, mut other_rx) = client(Uuid::new_v4(), 8);
        for c in [&typist_a, &typist_b, &other] {
            hub.register(c.clone());
            hub.subscribe(sub(c, channel));
        }

        hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "typing").excluding(typist));
        assert!(typist_a_rx.try_recv().is_err());
        assert!(typist_b_rx.try_recv().is_err());
        assert_eq!(other_rx.try_recv().unwrap().as_ref(), "typing");

        let delivery = hub.broadcast(&BroadcastMessage::to_user(WS, typist, "unread"));
        assert_eq!(delivery.delivered, 2);
        assert!(typist_a_rx.try_recv().is_ok());
        assert!(typist_b_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_other_workspace_not_reached() {
        let mut hub = Hub::new();
        let (c, mut rx) = client(Uuid::new_v4(), 8);
        hub.register(c.clone());
        let delivery = hub.broadcast(&BroadcastMessage::to_user("other", c.user_id, "x"));
        assert_eq!(delivery.delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_client_closed_fast_client_gets_everything() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let (slow, _slow_rx) = client(Uuid::new_v4(), 256);
        let (fast, mut fast_rx) = client(Uuid::new_v4(), 256);
        hub.register(slow.clone());
        hub.register(fast.clone());
        hub.subscribe(sub(&slow, channel));
        hub.subscribe(sub(&fast, channel));

        let mut received = 0;
        for i in 0..257 {
            let delivery =
                hub.broadcast(&BroadcastMessage::to_channel(WS, channel, format!("m{}", i)));
            if i < 256 {
                assert!(delivery.closed.is_empty());
            } else {
                assert_eq!(delivery.closed, vec![slow.id]);
            }
            while fast_rx.try_recv().is_ok() {
                received += 1;
            }
        }

        assert_eq!(received, 257);
        assert_eq!(hub.client_count(), 1);
        assert!(!hub.is_subscribed(WS, channel, slow.user_id));
    }

    #[test]
    fn test_join_on_one_session_reaches_every_session() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (laptop, mut laptop_rx) = client(user, 8);
        let (phone, mut phone_rx) = client(user, 8);
        hub.register(laptop.clone());
        hub.register(phone.clone());
        hub.subscribe(sub(&laptop, channel));

        let delivery = hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "hello"));
        assert_eq!(delivery.delivered, 2);
        assert_eq!(laptop_rx.try_recv().unwrap().as_ref(), "hello");
        assert_eq!(phone_rx.try_recv().unwrap().as_ref(), "hello");

        // Closing one session keeps the user's subscription for the other
        assert!(hub.unregister(&laptop.key()));
        assert!(hub.is_subscribed(WS, channel, user));
        let delivery = hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "still here"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(phone_rx.try_recv().unwrap().as_ref(), "still here");

        assert!(hub.unregister(&phone.key()));
        assert!(!hub.is_subscribed(WS, channel, user));
    }

    #[tokio::test]
    async fn test_closed_client_is_signalled() {
        let mut hub = Hub::new();
        let channel = Uuid::new_v4();
        let (slow, _rx) = client(Uuid::new_v4(), 1);
        hub.register(slow.clone());
        hub.subscribe(sub(&slow, channel));

        hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "1"));
        hub.broadcast(&BroadcastMessage::to_channel(WS, channel, "2"));

        tokio::time::timeout(Duration::from_secs(1), slow.closed.notified())
            .await
            .expect("slow client should be signalled");
    }

    #[tokio::test]
    async fn test_event_loop_applies_join_before_broadcast() {
        let hub = HubHandle::spawn(16);
        let channel = Uuid::new_v4();
        let (c, mut rx) = client(Uuid::new_v4(), 8);

        hub.register(c.clone()).await;
        hub.subscribe(sub(&c, channel)).await;
        hub.broadcast(BroadcastMessage::to_channel(WS, channel, "first")).await;

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_ref(), "first");

        hub.unsubscribe(sub(&c, channel)).await;
        hub.broadcast(BroadcastMessage::to_channel(WS, channel, "second")).await;
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err());
    }
}
