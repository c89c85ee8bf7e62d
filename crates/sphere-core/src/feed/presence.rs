//! Online-user presence.

use std::collections::BTreeSet;

use super::Reducer;
use crate::channel::{ChannelEvent, EventKind};

/// Users currently online, as reported by the live channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineSet {
    users: BTreeSet<String>,
}

impl OnlineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    pub fn replace(&mut self, users: impl IntoIterator<Item = String>) {
        self.users = users.into_iter().collect();
    }

    pub fn insert(&mut self, user_id: String) {
        self.users.insert(user_id);
    }

    pub fn remove(&mut self, user_id: &str) {
        self.users.remove(user_id);
    }
}

impl Reducer for OnlineSet {
    const LISTENER: &'static str = "presence";
    const KINDS: &'static [EventKind] = &[
        EventKind::OnlineUsers,
        EventKind::UserOnline,
        EventKind::UserOffline,
    ];

    fn apply(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::OnlineUsers(users) => self.replace(users.iter().cloned()),
            ChannelEvent::UserOnline(id) => self.insert(id.clone()),
            ChannelEvent::UserOffline(id) => self.remove(id),
            _ => {}
        }
    }
}
