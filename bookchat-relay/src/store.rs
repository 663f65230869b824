//! In-memory persistence for the development server.
//!
//! [`HistoryStore`] keeps every accepted message per room in acceptance
//! order; it backs the REST history endpoint and read receipts.
//! [`FileStore`] keeps uploaded files by generated id.
//!
//! Both are ephemeral: everything is lost on restart.

use std::collections::HashMap;

use bookchat_proto::message::{ChatMessage, MessageId};
use bookchat_proto::scope::Room;
use tokio::sync::RwLock;

/// Per-room message history.
#[derive(Default)]
pub struct HistoryStore {
    rooms: RwLock<HashMap<Room, Vec<ChatMessage>>>,
}

impl HistoryStore {
    /// Creates an empty history store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to a room's history, returning the new length.
    pub async fn append(&self, room: &Room, message: ChatMessage) -> usize {
        let mut rooms = self.rooms.write().await;
        let history = rooms.entry(room.clone()).or_default();
        history.push(message);
        history.len()
    }

    /// Returns a room's history in acceptance order.
    pub async fn list(&self, room: &Room) -> Vec<ChatMessage> {
        self.rooms
            .read()
            .await
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Marks a message read, returning the room it belongs to.
    ///
    /// Returns `None` for unknown ids.
    pub async fn mark_read(&self, id: &MessageId) -> Option<Room> {
        let mut rooms = self.rooms.write().await;
        rooms.iter_mut().find_map(|(room, history)| {
            let message = history.iter_mut().find(|m| m.id == *id)?;
            message.read = true;
            Some(room.clone())
        })
    }
}

/// An uploaded file.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Name supplied by the uploader.
    pub file_name: String,
    /// MIME type supplied by the uploader.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Uploaded files keyed by generated id.
#[derive(Default)]
pub struct FileStore {
    files: RwLock<HashMap<String, StoredFile>>,
}

impl FileStore {
    /// Creates an empty file store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file and returns its id.
    pub async fn put(&self, file: StoredFile) -> String {
        let id = uuid::Uuid::now_v7().simple().to_string();
        self.files.write().await.insert(id.clone(), file);
        id
    }

    /// Fetches a stored file.
    pub async fn get(&self, id: &str) -> Option<StoredFile> {
        self.files.read().await.get(id).cloned()
    }

    /// Number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}
