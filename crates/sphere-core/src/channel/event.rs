//! Named events carried by the live channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{ChatMessage, Notification};

/// Inbound event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    NewNotification,
    OnlineUsers,
    UserOnline,
    UserOffline,
    ReceiveMessage,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::NewNotification => "newNotification",
            EventKind::OnlineUsers => "online_users",
            EventKind::UserOnline => "user_online",
            EventKind::UserOffline => "user_offline",
            EventKind::ReceiveMessage => "receiveMessage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "newNotification" => Some(EventKind::NewNotification),
            "online_users" => Some(EventKind::OnlineUsers),
            "user_online" => Some(EventKind::UserOnline),
            "user_offline" => Some(EventKind::UserOffline),
            "receiveMessage" => Some(EventKind::ReceiveMessage),
            _ => None,
        }
    }
}

/// An event as it came off the wire, before typing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub data: Value,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceEntry {
    user_id: String,
}

/// A typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Notification(Notification),
    /// Full replacement of the online set.
    OnlineUsers(Vec<String>),
    UserOnline(String),
    UserOffline(String),
    Message(ChatMessage),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Notification(_) => EventKind::NewNotification,
            ChannelEvent::OnlineUsers(_) => EventKind::OnlineUsers,
            ChannelEvent::UserOnline(_) => EventKind::UserOnline,
            ChannelEvent::UserOffline(_) => EventKind::UserOffline,
            ChannelEvent::Message(_) => EventKind::ReceiveMessage,
        }
    }

    /// Type a raw event. `Ok(None)` for event names this client does not handle.
    pub fn decode(raw: RawEvent) -> Result<Option<Self>> {
        let Some(kind) = EventKind::from_name(&raw.name) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::NewNotification => {
                ChannelEvent::Notification(serde_json::from_value(raw.data)?)
            }
            EventKind::OnlineUsers => {
                let entries: Vec<PresenceEntry> = serde_json::from_value(raw.data)?;
                ChannelEvent::OnlineUsers(entries.into_iter().map(|e| e.user_id).collect())
            }
            EventKind::UserOnline => {
                let entry: PresenceEntry = serde_json::from_value(raw.data)?;
                ChannelEvent::UserOnline(entry.user_id)
            }
            EventKind::UserOffline => {
                let entry: PresenceEntry = serde_json::from_value(raw.data)?;
                ChannelEvent::UserOffline(entry.user_id)
            }
            EventKind::ReceiveMessage => ChannelEvent::Message(serde_json::from_value(raw.data)?),
        };
        Ok(Some(event))
    }
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub receiver_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    SendMessage(SendMessage),
}

impl OutboundEvent {
    pub fn into_raw(self) -> Result<RawEvent> {
        match self {
            OutboundEvent::SendMessage(msg) => {
                Ok(RawEvent::new("sendMessage", serde_json::to_value(msg)?))
            }
        }
    }
}
