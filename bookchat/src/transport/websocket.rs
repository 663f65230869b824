//! WebSocket transport for `BookChat`.
//!
//! Implements the [`Transport`] trait over a WebSocket connection to a chat
//! server speaking the postcard frames from [`bookchat_proto::codec`].
//!
//! A background driver task owns the socket. It performs the handshake,
//! forwards server frames as [`TransportEvent`]s, writes queued emissions,
//! and correlates acknowledgments. When the socket drops it reports
//! [`TransportEvent::Disconnected`] and reconnects with exponential backoff
//! until [`Transport::disconnect`] is called or the attempt budget runs out.
//! Emissions made before the first handshake stay queued and are flushed
//! once it completes. After a connection is lost, queued emissions are
//! dropped rather than replayed on the next socket; dropped and still-pending
//! acknowledgments surface to the caller as a closed ack channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use bookchat_proto::codec::{self, ClientFrame, ServerFrame};
use bookchat_proto::event::ClientEvent;
use bookchat_proto::scope::AuthPayload;

use super::{AckSender, Transport, TransportError, TransportEvent};
use crate::config::ReconnectConfig;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;

/// Read half of a WebSocket connection.
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Default timeout for establishing the socket and completing the handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An emission waiting for the driver to write it.
struct Outbound {
    event: ClientEvent,
    ack: Option<AckSender>,
}

/// Why a live connection ended.
enum Ended {
    /// `disconnect` was called or the transport was dropped.
    Shutdown,
    /// The socket failed or the server closed it.
    Lost(String),
}

/// WebSocket transport implementing the [`Transport`] trait.
pub struct WsTransport {
    url: String,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Create a transport for the given `ws://` or `wss://` URL.
    ///
    /// Nothing is opened until [`Transport::connect`] is called.
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            reconnect,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Override the socket connect and handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Return the server URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WsTransport {
    fn connect(&self, auth: AuthPayload) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Replacing the previous shutdown sender stops any earlier driver.
        if let Some(previous) = self.shutdown_tx.lock().replace(shutdown_tx) {
            let _ = previous.send(true);
        }
        *self.outbound_tx.lock() = Some(outbound_tx);
        self.closed.store(false, Ordering::Relaxed);

        let driver = Driver {
            url: self.url.clone(),
            auth,
            reconnect: self.reconnect.clone(),
            connect_timeout: self.connect_timeout,
            events_tx,
            outbound_rx,
            shutdown_rx,
        };
        tokio::spawn(driver.run());

        events_rx
    }

    fn emit(&self, event: ClientEvent, ack: Option<AckSender>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let guard = self.outbound_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::ConnectionClosed);
        };
        tx.send(Outbound { event, ack })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn disconnect(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.outbound_tx.lock().take();
        if let Some(shutdown) = self.shutdown_tx.lock().take() {
            let _ = shutdown.send(true);
        }
        tracing::info!(url = %self.url, "websocket transport disconnected");
    }
}

/// Background task owning the socket for one `connect` call.
struct Driver {
    url: String,
    auth: AuthPayload,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut was_connected = false;
        loop {
            let established = tokio::select! {
                _ = self.shutdown_rx.changed() => return,
                result = establish(&self.url, &self.auth, self.connect_timeout) => result,
            };

            match established {
                Ok((sender, reader)) => {
                    attempt = 0;
                    if was_connected {
                        self.discard_queued();
                    }
                    was_connected = true;
                    tracing::info!(url = %self.url, user_id = %self.auth.user_id, "websocket connected");
                    if self.events_tx.send(TransportEvent::Connected).is_err() {
                        return;
                    }
                    match self.pump(sender, reader).await {
                        Ended::Shutdown => return,
                        Ended::Lost(reason) => {
                            tracing::warn!(url = %self.url, reason = %reason, "websocket connection lost");
                            self.discard_queued();
                            if self
                                .events_tx
                                .send(TransportEvent::Disconnected { reason })
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, attempt, "websocket connect failed");
                    if self
                        .events_tx
                        .send(TransportEvent::ConnectError {
                            reason: e.to_string(),
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }

            attempt += 1;
            if attempt > self.reconnect.max_attempts {
                tracing::warn!(
                    url = %self.url,
                    max_attempts = self.reconnect.max_attempts,
                    "giving up reconnecting"
                );
                return;
            }
            let delay = self.reconnect.delay_for(attempt);
            tracing::debug!(attempt, ?delay, "reconnecting after backoff");
            tokio::select! {
                _ = self.shutdown_rx.changed() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Drop emissions queued for a connection that no longer exists.
    fn discard_queued(&mut self) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded emissions queued across a lost connection");
        }
    }

    /// Run one established connection until it ends.
    async fn pump(&mut self, mut sender: WsSender, mut reader: WsReader) -> Ended {
        let mut pending_acks: HashMap<u64, AckSender> = HashMap::new();
        let mut next_ack_id: u64 = 1;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    let _ = sender.send(Message::Close(None)).await;
                    return Ended::Shutdown;
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(Outbound { event, ack }) = outbound else {
                        let _ = sender.send(Message::Close(None)).await;
                        return Ended::Shutdown;
                    };
                    let ack_id = ack.map(|tx| {
                        let id = next_ack_id;
                        next_ack_id += 1;
                        pending_acks.insert(id, tx);
                        id
                    });
                    let name = event.name();
                    let bytes = match codec::encode(&ClientFrame::Emit { ack_id, event }) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!(event = name, error = %e, "failed to encode emission");
                            if let Some(id) = ack_id {
                                pending_acks.remove(&id);
                            }
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Binary(bytes.into())).await {
                        return Ended::Lost(format!("write failed: {e}"));
                    }
                    tracing::trace!(event = name, ?ack_id, "emitted");
                }
                incoming = reader.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => match codec::decode::<ServerFrame>(&data) {
                            Ok(ServerFrame::Event(event)) => {
                                if self.events_tx.send(TransportEvent::Server(event)).is_err() {
                                    let _ = sender.send(Message::Close(None)).await;
                                    return Ended::Shutdown;
                                }
                            }
                            Ok(ServerFrame::Ack { ack_id, ack }) => {
                                match pending_acks.remove(&ack_id) {
                                    Some(tx) => {
                                        let _ = tx.send(ack);
                                    }
                                    None => tracing::debug!(ack_id, "ack for unknown emission"),
                                }
                            }
                            Ok(other) => {
                                tracing::debug!(?other, "unexpected frame on live connection");
                            }
                            Err(e) => {
                                // Malformed frames are skipped, not fatal.
                                tracing::warn!(error = %e, "malformed server frame, skipping");
                            }
                        },
                        Some(Ok(Message::Close(_))) => return Ended::Lost("closed by server".into()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Ended::Lost(e.to_string()),
                        None => return Ended::Lost("stream ended".into()),
                    }
                }
            }
        }
    }
}

/// Open the socket and complete the handshake.
async fn establish(
    url: &str,
    auth: &AuthPayload,
    timeout: Duration,
) -> Result<(WsSender, WsReader), TransportError> {
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_connect_error)?;
    let (mut sender, mut reader) = stream.split();

    let hello = codec::encode(&ClientFrame::Handshake(auth.clone()))?;
    sender
        .send(Message::Binary(hello.into()))
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(format!("handshake send: {e}"))))?;

    let reply = tokio::time::timeout(timeout, reader.next())
        .await
        .map_err(|_| TransportError::Timeout)?;

    match reply {
        Some(Ok(Message::Binary(data))) => match codec::decode::<ServerFrame>(&data)? {
            ServerFrame::Connected => Ok((sender, reader)),
            ServerFrame::ConnectError { reason } => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Io(std::io::Error::other(format!(
                "unexpected handshake reply: {other:?}"
            )))),
        },
        Some(Ok(Message::Close(_))) | None => Err(TransportError::ConnectionClosed),
        Some(Ok(_)) => Err(TransportError::Io(std::io::Error::other(
            "unexpected non-binary frame during handshake",
        ))),
        Some(Err(e)) => Err(TransportError::Io(std::io::Error::other(format!(
            "websocket error during handshake: {e}"
        )))),
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "HTTP error during upgrade: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "websocket connection error: {other}"
        ))),
    }
}
