//! Loopback transport for testing.
//!
//! Created via [`LoopbackTransport::create_pair`], which returns the
//! client-side [`LoopbackTransport`] and a [`LoopbackPeer`] that plays the
//! server: it observes every emission (with its acknowledgment handle) and
//! injects lifecycle and server events.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use bookchat_proto::event::{ClientEvent, SendAck, ServerEvent};
use bookchat_proto::scope::AuthPayload;

use super::{AckSender, Transport, TransportError, TransportEvent};

/// An event emitted by the client, as seen by the [`LoopbackPeer`].
#[derive(Debug)]
pub struct Emission {
    /// The emitted event.
    pub event: ClientEvent,
    /// Acknowledgment handle, if the client asked for one.
    pub ack: Option<AckSender>,
}

impl Emission {
    /// Resolve the client's acknowledgment. No-op for unacknowledged events.
    pub fn acknowledge(self, ack: SendAck) {
        if let Some(tx) = self.ack {
            let _ = tx.send(ack);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    auth: Option<AuthPayload>,
    connect_calls: usize,
    disconnect_calls: usize,
    closed: bool,
}

/// Client half of an in-process transport pair.
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
    emitted_tx: mpsc::UnboundedSender<Emission>,
}

/// Server half of an in-process transport pair.
pub struct LoopbackPeer {
    shared: Arc<Mutex<Shared>>,
    emitted_rx: mpsc::UnboundedReceiver<Emission>,
}

impl LoopbackTransport {
    /// Create a connected transport/peer pair.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bookchat::transport::loopback::LoopbackTransport;
    /// use bookchat::transport::{Transport, TransportEvent};
    /// use bookchat_proto::scope::AuthPayload;
    /// use bookchat_proto::message::UserId;
    ///
    /// # async fn example() {
    /// let (transport, peer) = LoopbackTransport::create_pair();
    /// let mut events = transport.connect(AuthPayload {
    ///     user_id: UserId::new("alice"),
    ///     booking_id: None,
    ///     gig_id: None,
    /// });
    /// peer.connect_ok();
    /// assert_eq!(events.recv().await, Some(TransportEvent::Connected));
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair() -> (Self, LoopbackPeer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (emitted_tx, emitted_rx) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::clone(&shared),
            emitted_tx,
        };
        let peer = LoopbackPeer { shared, emitted_rx };
        (transport, peer)
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self, auth: AuthPayload) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock();
        shared.events_tx = Some(tx);
        shared.auth = Some(auth);
        shared.connect_calls += 1;
        shared.closed = false;
        rx
    }

    fn emit(&self, event: ClientEvent, ack: Option<AckSender>) -> Result<(), TransportError> {
        if self.shared.lock().closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.emitted_tx
            .send(Emission { event, ack })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn disconnect(&self) {
        let mut shared = self.shared.lock();
        shared.disconnect_calls += 1;
        shared.closed = true;
        shared.events_tx = None;
    }
}

impl LoopbackPeer {
    /// Push a raw transport event to the client.
    ///
    /// Returns `false` if the client has not connected or has disconnected.
    pub fn push(&self, event: TransportEvent) -> bool {
        let shared = self.shared.lock();
        shared
            .events_tx
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Report a successful connection.
    pub fn connect_ok(&self) -> bool {
        self.push(TransportEvent::Connected)
    }

    /// Report a lost connection.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.push(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
    }

    /// End the current event stream, as a transport that gave up
    /// reconnecting does. A later `connect` opens a fresh stream.
    pub fn end_stream(&self) {
        self.shared.lock().events_tx = None;
    }

    /// Push a server event.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.push(TransportEvent::Server(event))
    }

    /// Wait for the next emission from the client.
    pub async fn next_emission(&mut self) -> Option<Emission> {
        self.emitted_rx.recv().await
    }

    /// Take the next emission if one is already queued.
    pub fn try_next_emission(&mut self) -> Option<Emission> {
        self.emitted_rx.try_recv().ok()
    }

    /// Drain every queued emission, returning the events.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(emission) = self.emitted_rx.try_recv() {
            events.push(emission.event);
        }
        events
    }

    /// Credentials from the most recent `connect` call.
    #[must_use]
    pub fn auth(&self) -> Option<AuthPayload> {
        self.shared.lock().auth.clone()
    }

    /// Number of `connect` calls made by the client.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.shared.lock().connect_calls
    }

    /// Number of `disconnect` calls made by the client.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.shared.lock().disconnect_calls
    }
}
