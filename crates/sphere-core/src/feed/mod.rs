//! Feature state driven by the REST client and the live channel.
//!
//! Channel-fed state (presence, notifications, the open chat) is a plain
//! [`Reducer`] wrapped in a [`Listener`], which owns the shared state and the
//! scoped subscriptions that write into it. Subscriptions belong to one
//! connection; call [`Listener::attach`] again after every reconnect.

mod chat;
mod notifications;
mod optimistic;
mod posts;
mod presence;

pub use chat::{Conversation, open_conversation, send_chat_message};
pub use notifications::NotificationQueue;
pub use optimistic::Optimistic;
pub use posts::{PostView, toggle_follow};
pub use presence::OnlineSet;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::channel::{ChannelEvent, ChannelRef, EventKind, Subscription};
use crate::error::Result;

/// State that folds channel events.
pub trait Reducer: Send + 'static {
    /// Listener name used for this reducer's subscriptions.
    const LISTENER: &'static str;
    /// Events the reducer consumes.
    const KINDS: &'static [EventKind];

    fn apply(&mut self, event: &ChannelEvent);
}

/// Shared reducer state plus its subscriptions on the current connection.
pub struct Listener<R: Reducer> {
    state: Arc<Mutex<R>>,
    subscriptions: Vec<Subscription>,
    channel: Option<u64>,
}

impl<R: Reducer> Listener<R> {
    pub fn new(reducer: R) -> Self {
        Self {
            state: Arc::new(Mutex::new(reducer)),
            subscriptions: Vec::new(),
            channel: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, R> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to `channel`, dropping subscriptions held on any earlier one.
    /// Attaching twice to the same connection is a no-op.
    pub fn attach(&mut self, channel: &ChannelRef) -> Result<()> {
        if self.channel == Some(channel.id()) && self.is_attached() {
            return Ok(());
        }
        self.detach();

        let mut subscriptions = Vec::with_capacity(R::KINDS.len());
        for kind in R::KINDS {
            let state = Arc::clone(&self.state);
            subscriptions.push(channel.subscribe(*kind, R::LISTENER, move |event| {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(event);
            })?);
        }
        self.subscriptions = subscriptions;
        self.channel = Some(channel.id());
        debug!(listener = R::LISTENER, channel = channel.id(), "Listener attached");
        Ok(())
    }

    pub fn detach(&mut self) {
        self.subscriptions.clear();
        self.channel = None;
    }

    /// Whether subscriptions exist on a live connection.
    pub fn is_attached(&self) -> bool {
        !self.subscriptions.is_empty() && self.subscriptions.iter().all(Subscription::is_live)
    }

    pub fn read<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.lock())
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.lock())
    }
}

impl<R: Reducer + Default> Default for Listener<R> {
    fn default() -> Self {
        Self::new(R::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{FakeConnector, test_url};
    use crate::channel::{LiveChannel, RawEvent};
    use crate::client::ApiClient;
    use crate::config::ClientConfig;
    use crate::session::{SessionStore, test_user};
    use serde_json::json;
    use std::time::Duration;

    async fn connected() -> (Arc<FakeConnector>, Arc<LiveChannel>, SessionStore) {
        let connector = Arc::new(FakeConnector::default());
        let channel = LiveChannel::new(connector.clone(), test_url());
        let session = SessionStore::new();
        session.establish(test_user("u1", "ada"), "tokA".into());
        channel.sync(&session.snapshot()).await.unwrap();
        (connector, channel, session)
    }

    async fn settle<R: Reducer>(listener: &Listener<R>, done: impl Fn(&R) -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !listener.read(&done) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_presence_follows_channel() {
        let (connector, channel, _session) = connected().await;
        let mut presence = Listener::new(OnlineSet::new());
        presence.attach(&channel.current().await.unwrap()).unwrap();
        assert_eq!(channel.handler_count().await, Some(3));

        connector
            .push(RawEvent::new("online_users", json!([{"userId": "u2"}, {"userId": "u3"}])))
            .await;
        connector.push(RawEvent::new("user_offline", json!({"userId": "u3"}))).await;
        settle(&presence, |s| s.len() == 1).await;
        assert!(presence.read(|s| s.is_online("u2")));
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        let (_connector, channel, _session) = connected().await;
        let handle = channel.current().await.unwrap();
        let mut inbox = Listener::new(NotificationQueue::new());
        inbox.attach(&handle).unwrap();
        inbox.attach(&handle).unwrap();
        assert_eq!(channel.handler_count().await, Some(1));

        inbox.detach();
        assert_eq!(channel.handler_count().await, Some(0));
    }

    #[tokio::test]
    async fn test_reattach_after_reconnect() {
        let (connector, channel, session) = connected().await;
        let mut inbox = Listener::new(NotificationQueue::new());
        inbox.attach(&channel.current().await.unwrap()).unwrap();

        session.clear();
        channel.sync(&session.snapshot()).await.unwrap();
        assert!(!inbox.is_attached());

        session.establish(test_user("u1", "ada"), "tokB".into());
        channel.sync(&session.snapshot()).await.unwrap();
        assert_eq!(channel.handler_count().await, Some(0));

        inbox.attach(&channel.current().await.unwrap()).unwrap();
        assert!(inbox.is_attached());
        assert_eq!(channel.handler_count().await, Some(1));

        connector
            .push(RawEvent::new(
                "newNotification",
                json!({"_id": "n1", "message": "bob liked your post", "createdAt": "2024-05-01T10:00:00Z"}),
            ))
            .await;
        settle(&inbox, |q| q.unread() == 1).await;
    }

    #[tokio::test]
    async fn test_chat_send_echoes_locally() {
        let (connector, channel, session) = connected().await;
        let client = ApiClient::new(&ClientConfig::new("http://127.0.0.1:9"), session).unwrap();
        let handle = channel.current().await.unwrap();

        let mut chat = Listener::new(Conversation::new());
        chat.attach(&handle).unwrap();

        assert!(send_chat_message(&client, &handle, &chat, "hi").await.is_err());

        chat.update(|c| c.open("u2", Vec::new()));
        let echo = send_chat_message(&client, &handle, &chat, "hi").await.unwrap();
        assert_eq!(echo.receiver, "u2");
        assert_eq!(chat.read(|c| c.messages().len()), 1);

        let sent = connector.peers.lock().unwrap()[0].outbound.try_recv().unwrap();
        assert_eq!(sent.data, json!({"receiverId": "u2", "content": "hi"}));

        connector
            .push(RawEvent::new(
                "receiveMessage",
                json!({
                    "_id": "m9",
                    "sender": {"_id": "u2", "username": "bob"},
                    "receiver": "u1",
                    "content": "hey",
                    "createdAt": "2024-05-01T10:00:00Z"
                }),
            ))
            .await;
        settle(&chat, |c| c.messages().len() == 2).await;
    }
}
