//! Relay server core: shared state, WebSocket handler, and event routing.
//!
//! A client connects, presents its [`AuthPayload`] in a handshake frame, and
//! joins its booking or gig room. Messages it sends are validated, stamped
//! with a server id and time, stored, and broadcast to the room (including
//! back to the sender, whose copy doubles as the echo). Typing signals and
//! read receipts are forwarded to the other members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use bookchat_proto::codec::{self, ClientFrame, ServerFrame};
use bookchat_proto::event::{ClientEvent, SendAck, ServerEvent};
use bookchat_proto::message::{ChatMessage, MessageId, OutgoingMessage, UserId};
use bookchat_proto::scope::{AuthPayload, Room, RoomScope};

use crate::config::RelayConfig;
use crate::rooms::{ConnId, RoomRegistry};
use crate::store::{FileStore, HistoryStore};

/// A registered client connection.
struct Connection {
    user_id: UserId,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared relay server state.
pub struct RelayState {
    connections: RwLock<HashMap<ConnId, Connection>>,
    next_conn: AtomicU64,
    /// Room membership.
    pub rooms: RoomRegistry,
    /// Accepted messages per room.
    pub history: HistoryStore,
    /// Uploaded files.
    pub files: FileStore,
    max_content_len: usize,
    pub(crate) max_upload_size: usize,
    public_url: OnceLock<String>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::with_config(&RelayConfig::default())
    }
}

impl RelayState {
    /// Creates relay state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates relay state with limits from the resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        let public_url = OnceLock::new();
        if let Some(url) = &config.public_url {
            let _ = public_url.set(url.trim_end_matches('/').to_string());
        }
        Self {
            connections: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            rooms: RoomRegistry::new(),
            history: HistoryStore::new(),
            files: FileStore::new(),
            max_content_len: config.max_content_len,
            max_upload_size: config.max_upload_size,
            public_url,
        }
    }

    /// Base URL prefixed to stored file locations.
    pub fn public_url(&self) -> &str {
        self.public_url.get().map_or("", String::as_str)
    }

    /// Registers a connection, returning its id.
    async fn register(&self, user_id: UserId, sender: mpsc::UnboundedSender<Message>) -> ConnId {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .insert(conn, Connection { user_id, sender });
        conn
    }

    /// Removes a connection and its room memberships.
    async fn unregister(&self, conn: ConnId) {
        let left = self.rooms.leave_all(conn).await;
        self.connections.write().await.remove(&conn);
        tracing::debug!(conn, rooms = left.len(), "connection left rooms");
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every client.
    ///
    /// Clients see a lost connection and reconnect. Useful for testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn, connection) in conns.iter() {
            tracing::info!(conn, user_id = %connection.user_id, "sending close frame");
            let _ = connection.sender.send(Message::Close(None));
        }
    }

    /// Queue a frame for one connection.
    async fn send_to(&self, conn: ConnId, frame: &ServerFrame) {
        let Ok(bytes) = codec::encode(frame) else {
            tracing::error!(conn, "failed to encode server frame");
            return;
        };
        if let Some(connection) = self.connections.read().await.get(&conn) {
            let _ = connection.sender.send(Message::Binary(Bytes::from(bytes)));
        }
    }

    /// Push an event to every member of `room`, optionally skipping one
    /// connection.
    async fn broadcast(&self, room: &Room, event: ServerEvent, skip: Option<ConnId>) {
        let members = self.rooms.members(room).await;
        let frame = ServerFrame::Event(event);
        let Ok(bytes) = codec::encode(&frame).map(Bytes::from) else {
            tracing::error!(%room, "failed to encode broadcast frame");
            return;
        };
        let conns = self.connections.read().await;
        for conn in members.into_iter().filter(|c| Some(*c) != skip) {
            if let Some(connection) = conns.get(&conn) {
                let _ = connection.sender.send(Message::Binary(bytes.clone()));
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `Handshake` frame; refuse it if the user id is empty.
/// 2. Register the connection and send `Connected`.
/// 3. Process emissions until the socket closes.
/// 4. Unregister, which also leaves every joined room.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(auth) = wait_for_handshake(&mut ws_receiver).await else {
        tracing::warn!("connection closed before handshake");
        return;
    };

    if auth.user_id.as_str().is_empty() {
        tracing::warn!("handshake without user id refused");
        let refusal = ServerFrame::ConnectError {
            reason: "userId is required".to_string(),
        };
        let _ = send_frame(&mut ws_sender, &refusal).await;
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let user_id = auth.user_id.clone();
    let conn = state.register(user_id.clone(), tx).await;

    if let Err(e) = send_frame(&mut ws_sender, &ServerFrame::Connected).await {
        tracing::error!(conn, error = %e, "failed to confirm handshake");
        state.unregister(conn).await;
        return;
    }
    tracing::info!(conn, user_id = %user_id, scope = ?auth.scope().room(), "client connected");

    // Writer task: forwards queued frames to the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader task: processes client frames in order.
    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(conn, &reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn).await;
    tracing::info!(conn, user_id = %user_id, "client disconnected");
}

/// Waits for the handshake frame.
///
/// Returns `None` if the connection closes or anything else arrives first.
async fn wait_for_handshake(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<AuthPayload> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode::<ClientFrame>(&data) {
                    Ok(ClientFrame::Handshake(auth)) => Some(auth),
                    Ok(other) => {
                        tracing::warn!(frame = ?other, "expected handshake");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode handshake");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one binary frame from a connected client.
async fn handle_binary_message(conn: ConnId, user_id: &UserId, data: &[u8], state: &RelayState) {
    let frame = match codec::decode::<ClientFrame>(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn, error = %e, "failed to decode frame");
            return;
        }
    };

    match frame {
        ClientFrame::Emit { ack_id, event } => {
            let name = event.name();
            let ack = handle_event(conn, user_id, event, state).await;
            tracing::debug!(conn, event = name, success = ack.success, "event handled");
            if let Some(ack_id) = ack_id {
                state.send_to(conn, &ServerFrame::Ack { ack_id, ack }).await;
            }
        }
        ClientFrame::Handshake(_) => {
            tracing::warn!(conn, "duplicate handshake ignored");
        }
    }
}

/// Applies a client event and returns the acknowledgment for it.
async fn handle_event(
    conn: ConnId,
    user_id: &UserId,
    event: ClientEvent,
    state: &RelayState,
) -> SendAck {
    match event {
        ClientEvent::JoinBookingRoom { booking_id } => {
            join(conn, user_id, Room::Booking(booking_id), state).await
        }
        ClientEvent::JoinGigRoom { gig_id } => join(conn, user_id, Room::Gig(gig_id), state).await,
        ClientEvent::SendMessage(outgoing) => {
            match accept_message(conn, user_id, outgoing, state).await {
                Ok(()) => SendAck::ok(),
                Err(reason) => {
                    tracing::info!(conn, %reason, "message rejected");
                    SendAck::rejected(reason)
                }
            }
        }
        ClientEvent::Typing(scope) => {
            let event = ServerEvent::Typing {
                user_id: user_id.clone(),
            };
            forward_to_room(conn, &scope, event, state).await
        }
        ClientEvent::StopTyping(scope) => {
            let event = ServerEvent::StopTyping {
                user_id: user_id.clone(),
            };
            forward_to_room(conn, &scope, event, state).await
        }
        ClientEvent::MarkRead { message_id } => mark_read(conn, message_id, state).await,
    }
}

async fn join(conn: ConnId, user_id: &UserId, room: Room, state: &RelayState) -> SendAck {
    if state.rooms.join(&room, conn, user_id).await {
        tracing::info!(conn, user_id = %user_id, %room, "joined room");
    }
    SendAck::ok()
}

/// Validate, store, and broadcast a message.
async fn accept_message(
    conn: ConnId,
    user_id: &UserId,
    outgoing: OutgoingMessage,
    state: &RelayState,
) -> Result<(), String> {
    let room = RoomScope::new(outgoing.booking_id, outgoing.gig_id)
        .room()
        .ok_or("bookingId or gigId is required")?;
    if !state.rooms.is_member(&room, conn).await {
        return Err(format!("not a member of {room}"));
    }
    if outgoing.content.trim().is_empty() {
        return Err("message content is empty".to_string());
    }
    let len = outgoing.content.chars().count();
    if len > state.max_content_len {
        return Err(format!(
            "message too long: {len} characters (max {})",
            state.max_content_len
        ));
    }

    let recipient_id = state
        .rooms
        .counterpart(&room, user_id)
        .await
        .unwrap_or_else(|| UserId::new(""));
    let message = ChatMessage {
        id: MessageId::new(uuid::Uuid::now_v7().to_string()),
        sender_id: user_id.clone(),
        recipient_id,
        content: outgoing.content,
        kind: outgoing.kind,
        timestamp: chrono::Utc::now(),
        read: false,
        file_name: outgoing.file_name,
    };
    tracing::debug!(conn, message_id = %message.id, %room, "message accepted");

    state.history.append(&room, message.clone()).await;
    state
        .broadcast(&room, ServerEvent::Message(message), None)
        .await;
    Ok(())
}

async fn forward_to_room(
    conn: ConnId,
    scope: &RoomScope,
    event: ServerEvent,
    state: &RelayState,
) -> SendAck {
    let Some(room) = scope.room() else {
        return SendAck::rejected("bookingId or gigId is required");
    };
    if !state.rooms.is_member(&room, conn).await {
        return SendAck::rejected(format!("not a member of {room}"));
    }
    state.broadcast(&room, event, Some(conn)).await;
    SendAck::ok()
}

async fn mark_read(conn: ConnId, message_id: MessageId, state: &RelayState) -> SendAck {
    let Some(room) = state.history.mark_read(&message_id).await else {
        return SendAck::rejected(format!("unknown message {message_id}"));
    };
    state
        .broadcast(&room, ServerEvent::MessageRead { message_id }, Some(conn))
        .await;
    SendAck::ok()
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = codec::encode(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the server with a pre-configured [`RelayState`].
///
/// If the state has no public URL, `http://<bound address>` is used.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let _ = state.public_url.set(format!("http://{bound_addr}"));

    let app = crate::http::router(&state)
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
