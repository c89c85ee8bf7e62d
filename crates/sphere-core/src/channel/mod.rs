//! Live push channel.
//!
//! At most one connection exists at a time, and only while the session is
//! authenticated. Each connection gets a fresh [`Dispatcher`], so handlers
//! registered against an old connection can never fire on a new one; features
//! re-attach when [`ChannelState::Connected`] is observed again.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sphere_core::channel::{LiveChannel, WsConnector};
//! # use sphere_core::config::ClientConfig;
//! # use sphere_core::session::SessionStore;
//! # async fn run() -> sphere_core::Result<()> {
//! let config = ClientConfig::new("http://localhost:5000/api/v1");
//! let session = SessionStore::new();
//! let channel = LiveChannel::new(Arc::new(WsConnector::new()), config.channel_url()?);
//! let _task = channel.watch_session(session.subscribe());
//! # Ok(())
//! # }
//! ```

mod codec;
mod dispatch;
mod event;
mod lifecycle;
mod transport;
mod ws;

pub use codec::{EnginePacket, Handshake, SocketPacket};
pub use dispatch::{Dispatcher, Handler, Subscription};
pub use event::{ChannelEvent, EventKind, OutboundEvent, RawEvent, SendMessage};
pub use lifecycle::{ChannelRef, ChannelState, LiveChannel};
pub use transport::{Backoff, Connection, Connector};
pub use ws::WsConnector;

#[cfg(test)]
pub(crate) use lifecycle::testing;
