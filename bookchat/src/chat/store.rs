//! Ordered, deduplicated message collection for one chat session.
//!
//! [`MessageStore`] merges two sources that overlap: the REST history loaded
//! after every connection and the live `message` events pushed by the
//! server. An id appears at most once. History order is authoritative;
//! live messages the history does not know about keep their arrival order
//! after it.

use std::collections::HashMap;

use bookchat_proto::message::{ChatMessage, MessageId, UserId};

/// In-memory message list with an id index.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    index: HashMap<MessageId, usize>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a history snapshot into the store.
    ///
    /// The result is the history in server order followed by previously
    /// stored messages the history does not contain, in their prior relative
    /// order. For ids present on both sides the history copy wins, except
    /// that `read` is never reverted to `false`.
    pub fn seed_history(&mut self, history: Vec<ChatMessage>) {
        let mut previous: HashMap<MessageId, ChatMessage> = HashMap::with_capacity(self.len());
        let mut previous_order = Vec::with_capacity(self.len());
        for message in self.messages.drain(..) {
            previous_order.push(message.id.clone());
            previous.insert(message.id.clone(), message);
        }
        self.index.clear();

        for mut message in history {
            if let Some(old) = previous.remove(&message.id) {
                message.read |= old.read;
            }
            self.upsert(message);
        }
        for id in previous_order {
            if let Some(message) = previous.remove(&id) {
                self.upsert(message);
            }
        }
        tracing::trace!(count = self.len(), "history merged");
    }

    /// Adds a live message, or updates the stored copy if the id is known.
    ///
    /// Returns `true` if the message was new.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        self.upsert(message)
    }

    /// Marks a message read. Returns `false` for unknown ids.
    pub fn mark_read(&mut self, id: &MessageId) -> bool {
        match self.index.get(id) {
            Some(&pos) => {
                self.messages[pos].read = true;
                true
            }
            None => false,
        }
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterates messages in display order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Snapshot of the messages in display order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Number of unread messages authored by `sender`.
    #[must_use]
    pub fn unread_from(&self, sender: &UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.read && m.sender_id == *sender)
            .count()
    }

    fn upsert(&mut self, mut message: ChatMessage) -> bool {
        if let Some(&pos) = self.index.get(&message.id) {
            let slot = &mut self.messages[pos];
            message.read |= slot.read;
            *slot = message;
            return false;
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }
}
