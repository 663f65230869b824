//! Chat session layer for `BookChat`.
//!
//! Contains the [`ChatSession`] which owns the connection lifecycle for one
//! booking or gig conversation: it connects the transport and joins the
//! room, routes inbound events into the [`MessageStore`] and
//! [`TypingTracker`], reloads history after every connection, and exposes
//! the outbound operations (send, upload, typing, read receipts).
//!
//! All session state lives behind one `parking_lot` mutex that is only held
//! for synchronous critical sections. A history merge is one such section,
//! so it is atomic with respect to live `message` events.

pub mod ack;
pub mod send;
pub mod store;
pub mod typing;
pub mod upload;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use bookchat_proto::event::{ClientEvent, ServerEvent};
use bookchat_proto::message::{BookingId, ChatMessage, GigId, MessageId, UserId};
use bookchat_proto::scope::{AuthPayload, Room, RoomScope};

use crate::api::ChatApi;
use crate::config::SessionConfig;
use crate::transport::{Transport, TransportError, TransportEvent};

pub use store::MessageStore;
pub use typing::TypingTracker;

/// Errors returned to callers of [`ChatSession::send_message`] and
/// [`ChatSession::send_file`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The session is not connected; nothing was emitted.
    #[error("not connected")]
    NotConnected,

    /// The server acknowledged the emission with a failure.
    #[error("message rejected: {reason}")]
    SendRejected {
        /// Server-supplied reason.
        reason: String,
    },

    /// The file upload did not succeed; no message was sent.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The content failed local validation; nothing was emitted.
    #[error("validation failed: {0}")]
    Validation(#[from] bookchat_proto::message::ValidationError),

    /// The transport refused the emission or lost the acknowledgment.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No acknowledgment arrived within the configured timeout.
    #[error("timed out waiting for acknowledgment")]
    AckTimeout,

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

/// Errors from session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session has been closed and cannot reconnect.
    #[error("session closed")]
    Closed,
}

/// A failure observed by the session, surfaced through
/// [`ChatSession::error`] rather than returned from a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFault {
    /// The transport could not connect.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The history fetch after a connection failed. Stored messages are kept.
    #[error("failed to load chat history: {0}")]
    HistoryLoad(String),
}

/// Who the session is for and which conversation it joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// The local user.
    pub user_id: UserId,
    /// Booking scope. Takes precedence over `gig_id` when both are set.
    pub booking_id: Option<BookingId>,
    /// Gig scope.
    pub gig_id: Option<GigId>,
    /// Connect as soon as the session is opened.
    pub auto_connect: bool,
}

impl SessionIdentity {
    /// Identity with no room scope that connects on open.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            booking_id: None,
            gig_id: None,
            auto_connect: true,
        }
    }

    /// Scope the session to a booking.
    #[must_use]
    pub fn with_booking(mut self, booking_id: impl Into<BookingId>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }

    /// Scope the session to a gig.
    #[must_use]
    pub fn with_gig(mut self, gig_id: impl Into<GigId>) -> Self {
        self.gig_id = Some(gig_id.into());
        self
    }

    /// Defer connecting until [`ChatSession::connect`] is called.
    #[must_use]
    pub const fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// The `{bookingId, gigId}` pair.
    #[must_use]
    pub fn scope(&self) -> RoomScope {
        RoomScope::new(self.booking_id.clone(), self.gig_id.clone())
    }

    /// Credentials for the transport handshake.
    #[must_use]
    pub fn auth(&self) -> AuthPayload {
        AuthPayload {
            user_id: self.user_id.clone(),
            booking_id: self.booking_id.clone(),
            gig_id: self.gig_id.clone(),
        }
    }
}

/// Change notifications for a UI layer.
///
/// Events say what changed, not the new value; read the current state from
/// the session getters. Notifications are dropped when the receiver lags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The message list changed.
    MessagesChanged,
    /// The remote typing set changed.
    TypingChanged,
    /// The connection flag changed to the carried value.
    ConnectionChanged(bool),
    /// The stored fault changed.
    ErrorChanged(Option<SessionFault>),
    /// The loading flag changed to the carried value.
    LoadingChanged(bool),
}

/// Mutable session state, guarded by one mutex.
#[derive(Debug, Default)]
struct SessionState {
    store: MessageStore,
    typing: TypingTracker,
    connected: bool,
    error: Option<SessionFault>,
    pending_ops: usize,
    connections: u64,
}

#[derive(Debug, Default)]
struct Lifecycle {
    event_loop: Option<JoinHandle<()>>,
    closed: bool,
}

/// Shared core of a session, referenced by the event loop and spawned tasks.
pub(crate) struct Inner<T: Transport, A: ChatApi> {
    identity: SessionIdentity,
    transport: T,
    api: A,
    config: SessionConfig,
    state: Mutex<SessionState>,
    lifecycle: Mutex<Lifecycle>,
    events_tx: mpsc::Sender<SessionEvent>,
}

/// A real-time chat session for one booking or gig conversation.
///
/// Dropping the session performs the same teardown as [`close`](Self::close).
pub struct ChatSession<T: Transport, A: ChatApi> {
    inner: Arc<Inner<T, A>>,
}

impl<T: Transport, A: ChatApi> ChatSession<T, A> {
    /// Open a session.
    ///
    /// Returns the session and a receiver for [`SessionEvent`]s. Connects
    /// immediately when `identity.auto_connect` is set. Must be called from
    /// within a tokio runtime.
    pub fn open(
        identity: SessionIdentity,
        transport: T,
        api: A,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let auto_connect = identity.auto_connect;
        let session = Self {
            inner: Arc::new(Inner {
                identity,
                transport,
                api,
                config,
                state: Mutex::new(SessionState::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                events_tx,
            }),
        };
        if auto_connect {
            session.inner.start();
        }
        (session, events_rx)
    }

    /// Start connecting, if not already connected or connecting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after [`close`](Self::close).
    pub fn connect(&self) -> Result<(), SessionError> {
        if self.inner.lifecycle.lock().closed {
            return Err(SessionError::Closed);
        }
        self.inner.start();
        Ok(())
    }

    /// Disconnect the transport and cancel the local typing timer.
    ///
    /// Idempotent. No `stop_typing` is emitted.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether the transport is currently connected.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Snapshot of the messages in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().store.to_vec()
    }

    /// Look up one message by id.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<ChatMessage> {
        self.inner.state.lock().store.get(id).cloned()
    }

    /// Remote users currently typing.
    #[must_use]
    pub fn typing(&self) -> Vec<UserId> {
        self.inner.state.lock().typing.remote_typists()
    }

    /// The last connection or history fault, if any.
    #[must_use]
    pub fn error(&self) -> Option<SessionFault> {
        self.inner.state.lock().error.clone()
    }

    /// Whether a history load, send, or upload is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.inner.state.lock().pending_ops > 0
    }

    /// Number of unread messages from the other participants.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        let state = self.inner.state.lock();
        state
            .store
            .iter()
            .filter(|m| !m.read && m.sender_id != self.inner.identity.user_id)
            .count()
    }

    /// The identity this session was opened with.
    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.inner.identity
    }

    /// Mark a message read locally and, when connected, tell the server.
    ///
    /// Returns `false` (and emits nothing) for ids not in the store.
    pub fn mark_as_read(&self, id: &MessageId) -> bool {
        let connected = {
            let mut state = self.inner.state.lock();
            if !state.store.mark_read(id) {
                tracing::debug!(message_id = %id, "mark_as_read: unknown message");
                return false;
            }
            state.connected
        };
        self.inner.notify(SessionEvent::MessagesChanged);

        if connected {
            let event = ClientEvent::MarkRead {
                message_id: id.clone(),
            };
            if let Err(e) = self.inner.transport.emit(event, None) {
                tracing::debug!(message_id = %id, error = %e, "failed to emit mark_read");
            }
        }
        true
    }

    /// Register a local keystroke.
    ///
    /// The first keystroke of a burst emits `typing`; later ones only push
    /// back the inactivity timer. Once the timer fires, `stop_typing` is
    /// emitted. Does nothing while disconnected.
    pub fn start_typing(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.connected {
            return;
        }
        let scope = inner.identity.scope();
        let timeout = inner.config.typing_timeout;
        let weak = Arc::downgrade(inner);
        let started = state.typing.start_local(scope.clone(), move |generation| {
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire_local_typing(generation);
                }
            })
        });
        if started {
            inner.emit_unacked(ClientEvent::Typing(scope));
        }
    }

    /// End the local typing episode now, emitting one `stop_typing`.
    ///
    /// No-op when no episode is in progress.
    pub fn stop_typing(&self) {
        let mut state = self.inner.state.lock();
        if let Some(scope) = state.typing.stop_local()
            && state.connected
        {
            self.inner.emit_unacked(ClientEvent::StopTyping(scope));
        }
    }
}

impl<T: Transport, A: ChatApi> Drop for ChatSession<T, A> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<T: Transport, A: ChatApi> Inner<T, A> {
    /// Connect the transport, spawn the event loop, and join the room.
    fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.closed
            || lifecycle
                .event_loop
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        tracing::info!(
            user_id = %self.identity.user_id,
            room = ?self.identity.scope().room().map(|r| r.to_string()),
            "connecting chat session"
        );
        let events = self.transport.connect(self.identity.auth());
        // Reconnections are counted per event stream.
        self.state.lock().connections = 0;
        lifecycle.event_loop = Some(tokio::spawn(run_event_loop(Arc::clone(self), events)));
        drop(lifecycle);

        self.join_room();
    }

    fn close(&self) {
        let event_loop = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.closed {
                return;
            }
            lifecycle.closed = true;
            lifecycle.event_loop.take()
        };

        self.transport.disconnect();
        if let Some(handle) = event_loop {
            handle.abort();
        }

        let was_connected = {
            let mut state = self.state.lock();
            state.typing.cancel_local();
            std::mem::replace(&mut state.connected, false)
        };
        if was_connected {
            self.notify(SessionEvent::ConnectionChanged(false));
        }
        tracing::info!(user_id = %self.identity.user_id, "chat session closed");
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.lock().closed
    }

    fn join_room(&self) {
        let event = match self.identity.scope().room() {
            Some(Room::Booking(booking_id)) => ClientEvent::JoinBookingRoom { booking_id },
            Some(Room::Gig(gig_id)) => ClientEvent::JoinGigRoom { gig_id },
            None => {
                tracing::debug!("no booking or gig scope, not joining a room");
                return;
            }
        };
        self.emit_unacked(event);
    }

    fn emit_unacked(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.transport.emit(event, None) {
            tracing::warn!(event = name, error = %e, "emit failed");
        }
    }

    fn notify(&self, event: SessionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            tracing::trace!(error = %e, "session event not delivered");
        }
    }

    fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected { reason } => {
                tracing::info!(%reason, "disconnected");
                let changed = std::mem::replace(&mut self.state.lock().connected, false);
                if changed {
                    self.notify(SessionEvent::ConnectionChanged(false));
                }
            }
            TransportEvent::ConnectError { reason } => {
                tracing::warn!(%reason, "connection attempt failed");
                let fault = SessionFault::Connection(reason);
                self.state.lock().error = Some(fault.clone());
                self.notify(SessionEvent::ErrorChanged(Some(fault)));
            }
            TransportEvent::Server(event) => self.on_server_event(event),
        }
    }

    fn on_connected(self: &Arc<Self>) {
        let (reconnection, cleared) = {
            let mut state = self.state.lock();
            state.connected = true;
            state.connections += 1;
            (state.connections > 1, state.error.take().is_some())
        };
        tracing::info!(reconnection, "connected");
        self.notify(SessionEvent::ConnectionChanged(true));
        if cleared {
            self.notify(SessionEvent::ErrorChanged(None));
        }
        if reconnection {
            self.join_room();
        }

        let pending = PendingOp::begin(self);
        tokio::spawn(Arc::clone(self).load_history(pending));
    }

    fn on_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Message(message) => {
                tracing::debug!(message_id = %message.id, sender = %message.sender_id, "message received");
                self.state.lock().store.append(message);
                self.notify(SessionEvent::MessagesChanged);
            }
            ServerEvent::Typing { user_id } => {
                if user_id == self.identity.user_id {
                    return;
                }
                if self.state.lock().typing.on_remote_typing_start(user_id) {
                    self.notify(SessionEvent::TypingChanged);
                }
            }
            ServerEvent::StopTyping { user_id } => {
                if user_id == self.identity.user_id {
                    return;
                }
                if self.state.lock().typing.on_remote_typing_stop(&user_id) {
                    self.notify(SessionEvent::TypingChanged);
                }
            }
            ServerEvent::MessageRead { message_id } => {
                if self.state.lock().store.mark_read(&message_id) {
                    self.notify(SessionEvent::MessagesChanged);
                }
            }
        }
    }

    async fn load_history(self: Arc<Self>, _pending: PendingOp<T, A>) {
        let scope = self.identity.scope();
        match self.api.fetch_history(&self.identity.user_id, &scope).await {
            Ok(history) => {
                tracing::debug!(count = history.len(), "history loaded");
                self.state.lock().store.seed_history(history);
                self.notify(SessionEvent::MessagesChanged);
            }
            Err(e) => {
                tracing::warn!(error = %e, "history load failed");
                let fault = SessionFault::HistoryLoad(e.to_string());
                self.state.lock().error = Some(fault.clone());
                self.notify(SessionEvent::ErrorChanged(Some(fault)));
            }
        }
    }

    fn expire_local_typing(&self, generation: u64) {
        let mut state = self.state.lock();
        if let Some(scope) = state.typing.expire_local(generation)
            && state.connected
        {
            tracing::trace!(generation, "typing timer expired");
            self.emit_unacked(ClientEvent::StopTyping(scope));
        }
    }
}

/// Consume transport events in delivery order until the channel closes.
async fn run_event_loop<T: Transport, A: ChatApi>(
    inner: Arc<Inner<T, A>>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        inner.handle_transport_event(event);
    }
    tracing::debug!("transport event stream ended");

    inner.lifecycle.lock().event_loop = None;
    let was_connected = std::mem::replace(&mut inner.state.lock().connected, false);
    if was_connected {
        inner.notify(SessionEvent::ConnectionChanged(false));
    }
}

/// Counts one in-flight operation toward [`ChatSession::loading`] for as
/// long as it is alive.
pub(crate) struct PendingOp<T: Transport, A: ChatApi> {
    inner: Arc<Inner<T, A>>,
}

impl<T: Transport, A: ChatApi> PendingOp<T, A> {
    pub(crate) fn begin(inner: &Arc<Inner<T, A>>) -> Self {
        let first = {
            let mut state = inner.state.lock();
            state.pending_ops += 1;
            state.pending_ops == 1
        };
        if first {
            inner.notify(SessionEvent::LoadingChanged(true));
        }
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl<T: Transport, A: ChatApi> Drop for PendingOp<T, A> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.inner.state.lock();
            state.pending_ops = state.pending_ops.saturating_sub(1);
            state.pending_ops == 0
        };
        if last {
            self.inner.notify(SessionEvent::LoadingChanged(false));
        }
    }
}
