//! Per-connection handler registry with scoped subscriptions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::event::{ChannelEvent, EventKind};

/// Event handler. Runs on the channel's dispatch task, so it must not block.
pub type Handler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

type Slot = (EventKind, String);

/// Handlers attached to one connection.
///
/// One handler per `(event, listener)` pair: attaching the same pair again
/// replaces the earlier handler.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<BTreeMap<Slot, (u64, Handler)>>,
    next_token: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Slot, (u64, Handler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(self: &Arc<Self>, kind: EventKind, listener: &str, handler: Handler) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .insert((kind, listener.to_string()), (token, handler));

        Subscription {
            dispatcher: Arc::downgrade(self),
            kind,
            listener: listener.to_string(),
            token,
        }
    }

    /// Remove a handler if it is still the one `token` attached.
    fn detach(&self, kind: EventKind, listener: &str, token: u64) {
        let mut handlers = self.lock();
        let slot = (kind, listener.to_string());
        if handlers.get(&slot).is_some_and(|(t, _)| *t == token) {
            handlers.remove(&slot);
        }
    }

    /// Deliver an event to every handler of its kind.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let kind = event.kind();
        // Handlers run outside the lock so they may attach or detach.
        let targets: Vec<Handler> = self
            .lock()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, (_, handler))| Arc::clone(handler))
            .collect();

        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    pub fn handler_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Scoped registration. Dropping it detaches the handler.
///
/// Holds only a weak reference, so an outstanding subscription never keeps a
/// torn-down connection's handlers alive.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    dispatcher: Weak<Dispatcher>,
    kind: EventKind,
    listener: String,
    token: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the connection this subscription belongs to still exists.
    pub fn is_live(&self) -> bool {
        self.dispatcher.strong_count() > 0
    }

    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.detach(self.kind, &self.listener, self.token);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("listener", &self.listener)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_: &ChannelEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_dispatch_by_kind() {
        let dispatcher = Dispatcher::new();
        let (online, on_online) = counter();
        let (offline, on_offline) = counter();
        let _a = dispatcher.attach(EventKind::UserOnline, "chat", on_online);
        let _b = dispatcher.attach(EventKind::UserOffline, "chat", on_offline);

        assert_eq!(dispatcher.dispatch(&ChannelEvent::UserOnline("u1".into())), 1);
        assert_eq!(online.load(Ordering::SeqCst), 1);
        assert_eq!(offline.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_attach_same_listener_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        let old = dispatcher.attach(EventKind::UserOnline, "chat", h1);
        let _new = dispatcher.attach(EventKind::UserOnline, "chat", h2);
        assert_eq!(dispatcher.handler_count(), 1);

        // The replaced subscription must not remove its successor.
        drop(old);
        assert_eq!(dispatcher.handler_count(), 1);

        dispatcher.dispatch(&ChannelEvent::UserOnline("u1".into()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let sub = dispatcher.attach(EventKind::NewNotification, "bell", handler);
        assert_eq!(dispatcher.handler_count(), 1);
        sub.detach();
        assert_eq!(dispatcher.handler_count(), 0);
        dispatcher.dispatch(&ChannelEvent::UserOnline("u1".into()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outlives_dispatcher() {
        let dispatcher = Dispatcher::new();
        let (_, handler) = counter();
        let sub = dispatcher.attach(EventKind::UserOnline, "chat", handler);
        assert!(sub.is_live());
        drop(dispatcher);
        assert!(!sub.is_live());
        drop(sub);
    }
}
