//! Transport seam between the lifecycle and the wire.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::event::RawEvent;
use crate::error::Result;

/// An open connection to the push endpoint.
///
/// `events` ends when the transport is gone. Sending on `close` (or dropping
/// it) asks the transport to shut down.
pub struct Connection {
    pub events: mpsc::Receiver<RawEvent>,
    pub outbound: mpsc::Sender<RawEvent>,
    pub close: oneshot::Sender<()>,
}

/// Delay schedule for reconnecting after a lost or refused connection.
///
/// Doubles from `initial` on each failed attempt, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Opens authenticated connections.
///
/// The reconnect policy belongs to the transport: `backoff` returns `None`
/// when a lost connection should stay down until the session changes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, credential: &str) -> Result<Connection>;

    fn backoff(&self) -> Option<Backoff> {
        None
    }
}
