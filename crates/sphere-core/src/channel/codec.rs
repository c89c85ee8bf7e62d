//! Text frame codec for Socket.IO v5 over Engine.IO v4.
//!
//! Only the WebSocket transport and the default namespace are used, so binary
//! attachments and namespaced packets are rejected rather than decoded.
//!
//! ```text
//! frame   = engine-type [ payload ]
//! engine  : 0 open  1 close  2 ping  3 pong  4 message  5 upgrade  6 noop
//! message = socket-type [ ack-id ] [ json ]
//! socket  : 0 connect  1 disconnect  2 event  3 ack  4 connect_error
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::event::RawEvent;
use crate::error::{Error, Result};

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty frame".into()))?;
        let payload = chars.as_str();

        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(payload).map_err(|e| {
                Error::Protocol(format!("invalid open handshake: {}", e))
            })?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(payload.to_string()),
            '3' => EnginePacket::Pong(payload.to_string()),
            '4' => EnginePacket::Message(payload.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => {
                return Err(Error::Protocol(format!("unknown engine packet type {:?}", other)));
            }
        })
    }

    pub fn encode(&self) -> String {
        match self {
            // Clients never send an open packet; encode what the handshake would be.
            EnginePacket::Open(h) => format!(
                "0{{\"sid\":\"{}\",\"pingInterval\":{},\"pingTimeout\":{}}}",
                h.sid, h.ping_interval, h.ping_timeout
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: auth payload. Server: `{"sid": ...}` acknowledgement.
    Connect(Option<Value>),
    Disconnect,
    Event {
        event: RawEvent,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        data: Value,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn decode(message: &str) -> Result<Self> {
        let mut chars = message.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty socket packet".into()))?;
        let rest = chars.as_str();

        if rest.starts_with('/') {
            return Err(Error::Protocol("namespaced packets are not supported".into()));
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (ack_str, json) = rest.split_at(digits);
        let ack = if ack_str.is_empty() {
            None
        } else {
            Some(
                ack_str
                    .parse::<u64>()
                    .map_err(|e| Error::Protocol(format!("invalid ack id: {}", e)))?,
            )
        };

        let payload = if json.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(json)
                    .map_err(|e| Error::Protocol(format!("invalid packet payload: {}", e)))?,
            )
        };

        Ok(match kind {
            '0' => SocketPacket::Connect(payload),
            '1' => SocketPacket::Disconnect,
            '2' => SocketPacket::Event {
                event: event_from_payload(payload)?,
                ack,
            },
            '3' => SocketPacket::Ack {
                id: ack.ok_or_else(|| Error::Protocol("ack without id".into()))?,
                data: payload.unwrap_or(Value::Null),
            },
            '4' => SocketPacket::ConnectError(payload.unwrap_or(Value::Null)),
            '5' | '6' => {
                return Err(Error::Protocol("binary packets are not supported".into()));
            }
            other => {
                return Err(Error::Protocol(format!("unknown socket packet type {:?}", other)));
            }
        })
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { event, ack } => {
                let body = Value::Array(vec![Value::String(event.name.clone()), event.data.clone()]);
                match ack {
                    Some(id) => format!("2{}{}", id, body),
                    None => format!("2{}", body),
                }
            }
            SocketPacket::Ack { id, data } => format!("3{}{}", id, Value::Array(vec![data.clone()])),
            SocketPacket::ConnectError(data) => format!("4{}", data),
        }
    }

    /// Wrap into the engine message frame that carries it.
    pub fn into_frame(self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn event_from_payload(payload: Option<Value>) -> Result<RawEvent> {
    let Some(Value::Array(mut items)) = payload else {
        return Err(Error::Protocol("event payload must be an array".into()));
    };
    if items.is_empty() {
        return Err(Error::Protocol("event payload is empty".into()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => return Err(Error::Protocol(format!("event name must be a string, got {}", other))),
    };
    // Handlers on this channel take a single argument.
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.swap_remove(0)
    };
    Ok(RawEvent { name, data })
}

/// Message text of a connect error payload.
pub fn connect_error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| data.to_string())
}
