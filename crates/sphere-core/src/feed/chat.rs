//! One-to-one chat with the selected peer.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use super::{Listener, Reducer};
use crate::channel::{ChannelEvent, ChannelRef, EventKind};
use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::types::{ChatMessage, MessageSender, User};

/// The open conversation. Inbound messages from anyone but the open peer are
/// not shown here.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    peer: Option<String>,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Switch to `peer`, replacing the visible history.
    pub fn open(&mut self, peer: &str, history: Vec<ChatMessage>) {
        self.peer = Some(peer.to_string());
        self.messages = history;
    }

    pub fn close(&mut self) {
        self.peer = None;
        self.messages.clear();
    }

    /// Append a locally sent message.
    pub fn push_local(&mut self, me: &User, content: &str) -> Option<ChatMessage> {
        let peer = self.peer.clone()?;
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: MessageSender {
                id: me.id.clone(),
                username: me.username.clone(),
            },
            receiver: peer,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.push(message.clone());
        Some(message)
    }
}

impl Reducer for Conversation {
    const LISTENER: &'static str = "chat";
    const KINDS: &'static [EventKind] = &[EventKind::ReceiveMessage];

    fn apply(&mut self, event: &ChannelEvent) {
        if let ChannelEvent::Message(message) = event {
            if self.peer.as_deref() == Some(message.sender.id.as_str()) {
                self.messages.push(message.clone());
            }
        }
    }
}

/// Open the conversation with `peer_id` and load its history.
///
/// The conversation is opened even if the history cannot be fetched; it then
/// starts empty and the error is returned.
pub async fn open_conversation(
    client: &ApiClient,
    chat: &Listener<Conversation>,
    peer_id: &str,
) -> Result<()> {
    match client.chat_history(peer_id).await {
        Ok(history) => {
            chat.update(|c| c.open(peer_id, history));
            Ok(())
        }
        Err(e) => {
            warn!(peer = %peer_id, "Failed to load chat history: {}", e);
            chat.update(|c| c.open(peer_id, Vec::new()));
            Err(e)
        }
    }
}

/// Send `content` to the open peer and echo it locally.
pub async fn send_chat_message(
    client: &ApiClient,
    channel: &ChannelRef,
    chat: &Listener<Conversation>,
    content: &str,
) -> Result<ChatMessage> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::Invalid("message is empty".into()));
    }
    let me = client.session().identity().ok_or(Error::NotAuthenticated)?;
    let peer = chat
        .read(|c| c.peer().map(String::from))
        .ok_or_else(|| Error::Invalid("no conversation is open".into()))?;

    channel.send_message(&peer, content).await?;

    chat.update(|c| c.push_local(&me, content))
        .ok_or_else(|| Error::Invalid("conversation was closed".into()))
}
