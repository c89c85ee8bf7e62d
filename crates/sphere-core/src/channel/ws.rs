//! WebSocket transport speaking Socket.IO to the push endpoint.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use super::codec::{EnginePacket, Handshake, SocketPacket, connect_error_message};
use super::event::RawEvent;
use super::transport::{Backoff, Connection, Connector};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LIVENESS: Duration = Duration::from_secs(24 * 60 * 60);

static CRYPTO_PROVIDER: Once = Once::new();

/// Opens Socket.IO connections, authenticating with `{"token": credential}`.
///
/// Lost or refused connections are retried on the [`Backoff`] schedule
/// unless reconnection is turned off with `with_backoff(None)`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
    backoff: Option<Backoff>,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            backoff: Some(Backoff::default()),
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Option<Backoff>) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Select ring as the process-wide rustls provider for `wss://` endpoints.
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// How long the server may stay silent before the connection counts as lost.
fn liveness(handshake: &Handshake) -> Duration {
    Duration::from_millis(handshake.ping_interval.saturating_add(handshake.ping_timeout))
        .min(MAX_LIVENESS)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, credential: &str) -> Result<Connection> {
        if url.scheme() == "wss" {
            install_crypto_provider();
        }

        let (mut ws, handshake) = timeout(self.handshake_timeout, async {
            let (mut ws, _) = connect_async(url.as_str()).await?;
            let handshake = handshake(&mut ws, credential).await?;
            Ok::<_, Error>((ws, handshake))
        })
        .await
        .map_err(|_| Error::Channel("timed out opening live channel".into()))??;

        debug!(sid = %handshake.sid, "Live channel handshake complete");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();

        // Flush anything tungstenite queued (e.g. pongs) before handing off.
        ws.flush().await?;
        tokio::spawn(run(ws, handshake, events_tx, outbound_rx, close_rx));

        Ok(Connection {
            events: events_rx,
            outbound: outbound_tx,
            close: close_tx,
        })
    }

    fn backoff(&self) -> Option<Backoff> {
        self.backoff
    }
}

/// Engine open, then Socket.IO connect with the credential.
async fn handshake(ws: &mut WsStream, credential: &str) -> Result<Handshake> {
    let open = loop {
        match EnginePacket::decode(&next_text(ws).await?)? {
            EnginePacket::Open(handshake) => break handshake,
            EnginePacket::Noop => continue,
            other => {
                return Err(Error::Protocol(format!("expected open packet, got {:?}", other)));
            }
        }
    };

    let connect = SocketPacket::Connect(Some(json!({ "token": credential })));
    ws.send(Message::text(connect.into_frame())).await?;

    loop {
        match EnginePacket::decode(&next_text(ws).await?)? {
            EnginePacket::Message(message) => match SocketPacket::decode(&message)? {
                SocketPacket::Connect(_) => return Ok(open),
                SocketPacket::ConnectError(data) => {
                    return Err(Error::Channel(format!(
                        "connection refused: {}",
                        connect_error_message(&data)
                    )));
                }
                other => debug!("Ignoring packet before connect ack: {:?}", other),
            },
            EnginePacket::Ping(data) => {
                ws.send(Message::text(EnginePacket::Pong(data).encode())).await?;
            }
            EnginePacket::Close => {
                return Err(Error::Channel("closed during handshake".into()));
            }
            _ => {}
        }
    }
}

/// Next text frame. Control frames are handled by tungstenite.
async fn next_text(ws: &mut WsStream) -> Result<String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Channel("connection closed".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Connection I/O until closed from either side or the heartbeat lapses.
async fn run(
    mut ws: WsStream,
    handshake: Handshake,
    events: mpsc::Sender<RawEvent>,
    mut outbound: mpsc::Receiver<RawEvent>,
    mut close: oneshot::Receiver<()>,
) {
    let liveness = liveness(&handshake);
    let heartbeat = tokio::time::sleep(liveness);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            _ = &mut close => {
                let _ = ws.send(Message::text(SocketPacket::Disconnect.into_frame())).await;
                let _ = ws.close(None).await;
                debug!("Live channel closed by client");
                break;
            }
            Some(event) = outbound.recv() => {
                let name = event.name.clone();
                let frame = SocketPacket::Event { event, ack: None }.into_frame();
                if let Err(e) = ws.send(Message::text(frame)).await {
                    warn!(event = %name, "Failed to emit event: {}", e);
                    break;
                }
            }
            text = next_text(&mut ws) => {
                let text = match text {
                    Ok(text) => text,
                    Err(e) => {
                        info!("Live channel transport ended: {}", e);
                        break;
                    }
                };
                match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping(data)) => {
                        heartbeat.as_mut().reset(Instant::now() + liveness);
                        if let Err(e) = ws.send(Message::text(EnginePacket::Pong(data).encode())).await {
                            warn!("Failed to answer ping: {}", e);
                            break;
                        }
                    }
                    Ok(EnginePacket::Message(message)) => match SocketPacket::decode(&message) {
                        Ok(SocketPacket::Event { event, .. }) => {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(SocketPacket::Disconnect) => {
                            info!("Live channel disconnected by server");
                            break;
                        }
                        Ok(other) => debug!("Ignoring packet: {:?}", other),
                        Err(e) => warn!("Dropping undecodable packet: {}", e),
                    },
                    Ok(EnginePacket::Close) => {
                        info!("Live channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Dropping undecodable frame: {}", e),
                }
            }
            _ = &mut heartbeat => {
                warn!("Live channel heartbeat lapsed");
                break;
            }
        }
    }
}
