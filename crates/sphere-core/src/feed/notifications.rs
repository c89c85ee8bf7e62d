//! Notification inbox.

use std::collections::VecDeque;

use super::Reducer;
use crate::channel::{ChannelEvent, EventKind};
use crate::types::Notification;

/// Received notifications, newest first, with an unread counter.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    items: VecDeque<Notification>,
    unread: usize,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        self.items.push_front(notification);
        self.unread += 1;
    }

    /// Reset the unread counter. The queue itself is kept.
    pub fn mark_read(&mut self) {
        self.unread = 0;
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }
}

impl Reducer for NotificationQueue {
    const LISTENER: &'static str = "notifications";
    const KINDS: &'static [EventKind] = &[EventKind::NewNotification];

    fn apply(&mut self, event: &ChannelEvent) {
        if let ChannelEvent::Notification(notification) = event {
            self.push(notification.clone());
        }
    }
}
