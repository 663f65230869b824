//! Room membership for the development server.
//!
//! A room is joined per connection: membership ends when the socket closes,
//! and clients re-join after reconnecting. The registry also remembers every
//! user who ever joined a room so the server can address messages to the
//! other participant.

use std::collections::{BTreeSet, HashMap};

use bookchat_proto::message::UserId;
use bookchat_proto::scope::Room;
use tokio::sync::RwLock;

/// Server-assigned connection identifier.
pub type ConnId = u64;

#[derive(Default)]
struct RoomEntry {
    members: HashMap<ConnId, UserId>,
    participants: BTreeSet<UserId>,
}

/// Directory of rooms and their connected members.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Room, RoomEntry>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room. Returns `false` if it was already a member.
    pub async fn join(&self, room: &Room, conn: ConnId, user_id: &UserId) -> bool {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.clone()).or_default();
        entry.participants.insert(user_id.clone());
        entry.members.insert(conn, user_id.clone()).is_none()
    }

    /// Removes a connection from every room, returning the rooms it left.
    pub async fn leave_all(&self, conn: ConnId) -> Vec<Room> {
        let mut rooms = self.rooms.write().await;
        rooms
            .iter_mut()
            .filter_map(|(room, entry)| entry.members.remove(&conn).map(|_| room.clone()))
            .collect()
    }

    /// Whether a connection has joined a room.
    pub async fn is_member(&self, room: &Room, conn: ConnId) -> bool {
        self.rooms
            .read()
            .await
            .get(room)
            .is_some_and(|entry| entry.members.contains_key(&conn))
    }

    /// Connections currently in a room.
    pub async fn members(&self, room: &Room) -> Vec<ConnId> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|entry| entry.members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The first participant of `room` other than `user_id`, by id order.
    pub async fn counterpart(&self, room: &Room, user_id: &UserId) -> Option<UserId> {
        self.rooms
            .read()
            .await
            .get(room)?
            .participants
            .iter()
            .find(|p| *p != user_id)
            .cloned()
    }
}
