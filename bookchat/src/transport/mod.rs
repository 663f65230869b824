//! Event transport abstraction for `BookChat`.
//!
//! Defines the [`Transport`] trait the chat session talks to. A transport is
//! a pub/sub-over-socket primitive: it connects in the background, reports
//! its lifecycle and pushed server events on a channel, and accepts named
//! emissions with an optional one-shot acknowledgment.
//!
//! Implementations:
//! - [`loopback::LoopbackTransport`]: in-process transport for testing
//! - [`websocket::WsTransport`]: WebSocket adapter with reconnection

pub mod loopback;
pub mod websocket;

use tokio::sync::{mpsc, oneshot};

use bookchat_proto::event::{ClientEvent, SendAck, ServerEvent};
use bookchat_proto::scope::AuthPayload;

/// One-shot completion handle the transport resolves with the server's
/// acknowledgment. Dropping it without sending signals a lost ack.
pub type AckSender = oneshot::Sender<SendAck>;

/// Lifecycle and data events reported by a transport, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection was established and authenticated.
    Connected,
    /// An established connection was lost.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectError {
        /// Human-readable cause.
        reason: String,
    },
    /// The server pushed an event.
    Server(ServerEvent),
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed or the transport was shut down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server refused the handshake.
    #[error("connection refused by server: {0}")]
    Rejected(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bookchat_proto::codec::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pub/sub transport consumed by the chat session.
///
/// `emit` never blocks and never waits for the network: it hands the event
/// to the transport, which delivers it when it can. Whether the emission
/// reached the server is only known through the acknowledgment.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting with the given credentials.
    ///
    /// Returns the receiver for this connection's [`TransportEvent`]s. The
    /// connection outcome is reported as [`TransportEvent::Connected`] or
    /// [`TransportEvent::ConnectError`]; the call itself does not wait for
    /// it. The channel closes once the transport is disconnected.
    fn connect(&self, auth: AuthPayload) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Emit a named event, optionally registering an acknowledgment handle.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the transport has been
    /// disconnected, or a codec error if the event cannot be framed.
    fn emit(&self, event: ClientEvent, ack: Option<AckSender>) -> Result<(), TransportError>;

    /// Close the connection and stop any reconnection attempts.
    fn disconnect(&self);
}
