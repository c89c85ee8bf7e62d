//! Authentication-gated live channel.
//!
//! ```text
//! Disconnected ──(session authenticated, no handle)──► Connecting ──► Connected
//!      ▲                                                   │              │
//!      └──────── connect error / logout / shutdown / transport lost ──────┘
//! ```
//!
//! While the session stays authenticated, [`LiveChannel::watch_session`]
//! retries a refused or lost connection on the connector's backoff schedule.
//! Every reconnect is a new handle with an empty dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::dispatch::{Dispatcher, Subscription};
use super::event::{ChannelEvent, EventKind, OutboundEvent, RawEvent, SendMessage};
use super::transport::Connector;
use crate::error::{Error, Result};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Feature-facing reference to the active connection.
///
/// Does not own the connection: once it is torn down, subscribing fails and
/// emitting returns an error.
#[derive(Clone)]
pub struct ChannelRef {
    id: u64,
    dispatcher: Weak<Dispatcher>,
    outbound: mpsc::Sender<RawEvent>,
}

impl ChannelRef {
    /// Connection generation; changes on every reconnect.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.dispatcher.strong_count() > 0 && !self.outbound.is_closed()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| Error::Channel("channel is closed".into()))?;
        Ok(dispatcher.attach(kind, listener, Arc::new(handler)))
    }

    pub async fn emit(&self, event: OutboundEvent) -> Result<()> {
        if self.dispatcher.strong_count() == 0 {
            return Err(Error::Channel("channel is closed".into()));
        }
        self.outbound
            .send(event.into_raw()?)
            .await
            .map_err(|_| Error::Channel("channel is closed".into()))
    }

    pub async fn send_message(&self, receiver_id: &str, content: &str) -> Result<()> {
        self.emit(OutboundEvent::SendMessage(SendMessage {
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
        }))
        .await
    }
}

struct Active {
    id: u64,
    dispatcher: Arc<Dispatcher>,
    outbound: mpsc::Sender<RawEvent>,
    close: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl Active {
    fn channel_ref(&self) -> ChannelRef {
        ChannelRef {
            id: self.id,
            dispatcher: Arc::downgrade(&self.dispatcher),
            outbound: self.outbound.clone(),
        }
    }
}

/// Owner of the single live channel for the running session.
pub struct LiveChannel {
    connector: Arc<dyn Connector>,
    url: Url,
    active: Mutex<Option<Active>>,
    state: watch::Sender<ChannelState>,
    next_id: AtomicU64,
    lost: Notify,
}

impl LiveChannel {
    pub fn new(connector: Arc<dyn Connector>, url: Url) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Arc::new(Self {
            connector,
            url,
            active: Mutex::new(None),
            state,
            next_id: AtomicU64::new(1),
            lost: Notify::new(),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// The active connection, if any.
    pub async fn current(&self) -> Option<ChannelRef> {
        self.active.lock().await.as_ref().map(Active::channel_ref)
    }

    /// Handlers attached to the active connection.
    pub async fn handler_count(&self) -> Option<usize> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.dispatcher.handler_count())
    }

    /// Bring the channel in line with the session.
    ///
    /// Connects when authenticated and no handle exists; tears down when not
    /// authenticated. A credential change alone keeps the existing channel.
    pub async fn sync(self: &Arc<Self>, session: &Session) -> Result<()> {
        let mut active = self.active.lock().await;

        match session.credential() {
            Some(credential) if session.is_authenticated() => {
                if active.is_none() {
                    *active = Some(self.open(credential).await?);
                }
            }
            _ => {
                if let Some(current) = active.take() {
                    self.teardown(current);
                }
            }
        }
        Ok(())
    }

    /// Tear the channel down regardless of session state.
    pub async fn shutdown(&self) {
        if let Some(current) = self.active.lock().await.take() {
            self.teardown(current);
        }
    }

    /// Follow session transitions until the session store goes away.
    ///
    /// A refused or lost connection is retried after the connector's backoff
    /// delay, always with the session's current credential.
    pub fn watch_session(self: &Arc<Self>, mut session: watch::Receiver<Session>) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        let backoff = self.connector.backoff();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            'sessions: loop {
                let snapshot = session.borrow_and_update().clone();
                let mut retry = None;
                match channel.sync(&snapshot).await {
                    Ok(()) => {
                        if channel.state() == ChannelState::Connected {
                            attempt = 0;
                        }
                    }
                    Err(e) => {
                        warn!("Live channel unavailable: {}", e);
                        retry = backoff.map(|b| b.delay(attempt));
                        attempt = attempt.saturating_add(1);
                    }
                }

                loop {
                    tokio::select! {
                        changed = session.changed() => {
                            if changed.is_err() {
                                break 'sessions;
                            }
                            break;
                        }
                        _ = channel.lost.notified() => {
                            if let Some(b) = backoff {
                                retry = Some(b.delay(attempt));
                                attempt = attempt.saturating_add(1);
                            }
                        }
                        _ = tokio::time::sleep(retry.unwrap_or_default()), if retry.is_some() => {
                            debug!(attempt, "Reconnecting live channel");
                            break;
                        }
                    }
                }
            }
            channel.shutdown().await;
        })
    }

    async fn open(self: &Arc<Self>, credential: &str) -> Result<Active> {
        self.state.send_replace(ChannelState::Connecting);
        debug!(url = %self.url, "Connecting live channel");

        let connection = match self.connector.connect(&self.url, credential).await {
            Ok(connection) => connection,
            Err(e) => {
                self.state.send_replace(ChannelState::Disconnected);
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Dispatcher::new();
        let pump = tokio::spawn(pump(
            Arc::downgrade(self),
            id,
            Arc::downgrade(&dispatcher),
            connection.events,
        ));

        self.state.send_replace(ChannelState::Connected);
        info!(channel = id, "Live channel connected");

        Ok(Active {
            id,
            dispatcher,
            outbound: connection.outbound,
            close: connection.close,
            pump,
        })
    }

    fn teardown(&self, active: Active) {
        active.dispatcher.clear();
        active.pump.abort();
        let _ = active.close.send(());
        self.state.send_replace(ChannelState::Disconnected);
        info!(channel = active.id, "Live channel disconnected");
    }

    async fn on_transport_closed(&self, id: u64) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.id == id) {
            if let Some(lost) = active.take() {
                lost.dispatcher.clear();
                self.state.send_replace(ChannelState::Disconnected);
                warn!(channel = id, "Live channel lost");
                self.lost.notify_one();
            }
        }
    }
}

/// Deliver inbound events in arrival order.
///
/// Only the active handle owns the dispatcher; once it is torn down the pump
/// stops delivering even if the transport is still draining.
async fn pump(
    channel: Weak<LiveChannel>,
    id: u64,
    dispatcher: Weak<Dispatcher>,
    mut events: mpsc::Receiver<RawEvent>,
) {
    while let Some(raw) = events.recv().await {
        let Some(dispatcher) = dispatcher.upgrade() else {
            return;
        };
        let name = raw.name.clone();
        match ChannelEvent::decode(raw) {
            Ok(Some(event)) => {
                dispatcher.dispatch(&event);
            }
            Ok(None) => debug!(event = %name, "Ignoring unhandled channel event"),
            Err(e) => warn!(event = %name, "Dropping malformed channel event: {}", e),
        }
    }

    if let Some(channel) = channel.upgrade() {
        channel.on_transport_closed(id).await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::channel::transport::Backoff;
    use crate::session::{SessionStore, test_user};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn setup() -> (Arc<FakeConnector>, Arc<LiveChannel>) {
        let connector = Arc::new(FakeConnector::default());
        let channel = LiveChannel::new(connector.clone(), test_url());
        (connector, channel)
    }

    fn reconnecting() -> (Arc<FakeConnector>, Arc<LiveChannel>) {
        let connector = Arc::new(FakeConnector {
            backoff: Some(Backoff {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
            }),
            ..Default::default()
        });
        let channel = LiveChannel::new(connector.clone(), test_url());
        (connector, channel)
    }

    /// Wait until the active handle is one other than `previous`.
    async fn next_handle(channel: &LiveChannel, previous: u64) -> ChannelRef {
        timeout(Duration::from_secs(2), async {
            loop {
                if let Some(handle) = channel.current().await {
                    if handle.id() != previous {
                        return handle;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    fn authenticated(token: &str) -> Session {
        let store = SessionStore::new();
        store.establish(test_user("u1", "ada"), token.to_string());
        store.snapshot()
    }

    #[tokio::test]
    async fn test_no_channel_while_unauthenticated() {
        let (connector, channel) = setup();
        channel.sync(&Session::default()).await.unwrap();
        assert_eq!(connector.connect_count(), 0);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.current().await.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_then_logout() {
        let (connector, channel) = setup();

        channel.sync(&authenticated("tokA")).await.unwrap();
        assert_eq!(connector.credentials(), vec!["tokA".to_string()]);
        assert_eq!(channel.state(), ChannelState::Connected);

        let handle = channel.current().await.unwrap();
        let _sub = handle
            .subscribe(EventKind::NewNotification, "bell", |_| {})
            .unwrap();
        assert_eq!(channel.handler_count().await, Some(1));

        channel.sync(&Session::default()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.current().await.is_none());
        assert_eq!(connector.open_count(), 0);
        assert!(!handle.is_open());
        assert!(handle.subscribe(EventKind::UserOnline, "chat", |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_repeated_sync_keeps_single_channel() {
        let (connector, channel) = setup();
        let session = authenticated("tokA");
        channel.sync(&session).await.unwrap();
        channel.sync(&session).await.unwrap();
        // Refreshed credential: same channel.
        channel.sync(&authenticated("tokB")).await.unwrap();
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_starts_with_clean_handlers() {
        let (connector, channel) = setup();

        for round in 0..3 {
            channel.sync(&authenticated("tokA")).await.unwrap();
            assert_eq!(connector.open_count(), 1);
            assert_eq!(channel.handler_count().await, Some(0), "round {}", round);

            let handle = channel.current().await.unwrap();
            let _a = handle.subscribe(EventKind::UserOnline, "chat", |_| {}).unwrap();
            let _b = handle.subscribe(EventKind::UserOffline, "chat", |_| {}).unwrap();
            assert_eq!(channel.handler_count().await, Some(2));

            channel.sync(&Session::default()).await.unwrap();
            assert_eq!(connector.open_count(), 0);
        }
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers_in_order() {
        let (connector, channel) = setup();
        channel.sync(&authenticated("tokA")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = channel.current().await.unwrap();
        let _online = handle
            .subscribe(EventKind::UserOnline, "test", {
                let tx = tx.clone();
                move |e| {
                    let _ = tx.send(e.clone());
                }
            })
            .unwrap();
        let _offline = handle
            .subscribe(EventKind::UserOffline, "test", move |e| {
                let _ = tx.send(e.clone());
            })
            .unwrap();

        connector.push(RawEvent::new("typing", json!({}))).await;
        connector.push(RawEvent::new("user_online", json!({"userId": "u2"}))).await;
        connector.push(RawEvent::new("user_offline", json!({"userId": "u2"}))).await;

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ChannelEvent::UserOnline("u2".into()));
        assert_eq!(second, ChannelEvent::UserOffline("u2".into()));
    }

    #[tokio::test]
    async fn test_send_message_goes_outbound() {
        let (connector, channel) = setup();
        channel.sync(&authenticated("tokA")).await.unwrap();
        let handle = channel.current().await.unwrap();
        handle.send_message("u2", "hello").await.unwrap();

        let mut peers = connector.peers.lock().unwrap();
        let sent = peers[0].outbound.try_recv().unwrap();
        assert_eq!(sent.name, "sendMessage");
        assert_eq!(sent.data, json!({"receiverId": "u2", "content": "hello"}));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let (connector, channel) = setup();
        connector.refuse.store(true, Ordering::SeqCst);
        let result = channel.sync(&authenticated("tokA")).await;
        assert!(matches!(result, Err(Error::Channel(_))));
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.current().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_loss_releases_handle() {
        let (connector, channel) = setup();
        channel.sync(&authenticated("tokA")).await.unwrap();
        let mut state = channel.watch_state();

        // Server side goes away.
        connector.peers.lock().unwrap().clear();

        timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ChannelState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(channel.current().await.is_none());

        // Next sync while authenticated reconnects.
        channel.sync(&authenticated("tokA")).await.unwrap();
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn test_watch_session_follows_transitions() {
        let (connector, channel) = setup();
        let store = SessionStore::new();
        let mut state = channel.watch_state();
        let task = channel.watch_session(store.subscribe());

        store.establish(test_user("u1", "ada"), "tokA".into());
        timeout(Duration::from_secs(1), state.wait_for(|s| *s == ChannelState::Connected))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connector.credentials(), vec!["tokA".to_string()]);

        store.clear();
        timeout(Duration::from_secs(1), state.wait_for(|s| *s == ChannelState::Disconnected))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connector.open_count(), 0);

        store.establish(test_user("u1", "ada"), "tokB".into());
        timeout(Duration::from_secs(1), state.wait_for(|s| *s == ChannelState::Connected))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connector.open_count(), 1);
        assert_eq!(connector.connect_count(), 2);

        drop(store);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_lost_transport_reconnects_while_authenticated() {
        let (connector, channel) = reconnecting();
        let store = SessionStore::new();
        let _task = channel.watch_session(store.subscribe());

        store.establish(test_user("u1", "ada"), "tokA".into());
        let first = next_handle(&channel, 0).await;
        let _sub = first.subscribe(EventKind::UserOnline, "chat", |_| {}).unwrap();
        assert_eq!(channel.handler_count().await, Some(1));

        // Refreshed credential keeps the channel, but is used to reconnect.
        assert!(store.replace_credential("tokB".into()));
        connector.peers.lock().unwrap().clear();

        let second = next_handle(&channel, first.id()).await;
        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(channel.handler_count().await, Some(0));
        assert_eq!(connector.credentials(), vec!["tokB".to_string()]);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_refused_connect_is_retried() {
        let (connector, channel) = reconnecting();
        connector.refuse.store(true, Ordering::SeqCst);
        let store = SessionStore::new();
        let _task = channel.watch_session(store.subscribe());

        store.establish(test_user("u1", "ada"), "tokA".into());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(channel.current().await.is_none());

        connector.refuse.store(false, Ordering::SeqCst);
        next_handle(&channel, 0).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_no_reconnect_after_logout() {
        let (connector, channel) = reconnecting();
        let store = SessionStore::new();
        let mut state = channel.watch_state();
        let _task = channel.watch_session(store.subscribe());

        store.establish(test_user("u1", "ada"), "tokA".into());
        next_handle(&channel, 0).await;

        store.clear();
        timeout(Duration::from_secs(1), state.wait_for(|s| *s == ChannelState::Disconnected))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(channel.current().await.is_none());
        assert_eq!(connector.connect_count(), 1);
    }
}
