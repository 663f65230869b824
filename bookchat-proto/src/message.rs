//! Chat message types shared by the client, the REST API, and the event
//! transport.
//!
//! The same types travel as JSON over the REST history endpoint and as
//! postcard inside WebSocket frames, so field attributes are limited to the
//! ones both formats understand (no `flatten`, no `skip_serializing_if`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters accepted in a single message body.
pub const MAX_CONTENT_CHARS: usize = 10_000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id! {
    /// Server-assigned unique message identifier.
    MessageId
}

string_id! {
    /// Identifies a marketplace user (client or service provider).
    UserId
}

string_id! {
    /// Identifies a booking; scopes a booking chat room.
    BookingId
}

string_id! {
    /// Identifies a gig listing; scopes a pre-booking chat room.
    GigId
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text typed by a participant.
    Text,
    /// Uploaded file; `content` holds its URL.
    File,
    /// Uploaded image; `content` holds its URL.
    Image,
    /// Generated by the platform, not by a participant.
    System,
    /// Booking status change notice (confirmed, cancelled, ...).
    BookingUpdate,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
            Self::System => "system",
            Self::BookingUpdate => "booking_update",
        };
        f.write_str(name)
    }
}

/// A chat message as stored by the server.
///
/// Immutable once created apart from [`read`](Self::read), which only
/// ever flips from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned identifier.
    #[serde(alias = "_id")]
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// The other participant.
    pub recipient_id: UserId,
    /// Text body, or the resource URL for file messages.
    pub content: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// When the server accepted the message.
    pub timestamp: DateTime<Utc>,
    /// Whether the recipient has read the message.
    #[serde(default)]
    pub read: bool,
    /// Original file name for `file` messages.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Payload of an outbound `send_message` emission.
///
/// The server assigns id, sender, recipient, and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Text body, or the resource URL for file messages.
    pub content: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Booking room the message belongs to.
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    /// Gig room the message belongs to.
    #[serde(default)]
    pub gig_id: Option<GigId>,
    /// Original file name for `file` messages.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Reasons an outgoing message is refused before it is emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The content is empty or whitespace only.
    #[error("message content is empty")]
    Empty,
    /// The content exceeds [`MAX_CONTENT_CHARS`].
    #[error("message content too long: {len} characters (max {max})")]
    TooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

impl OutgoingMessage {
    /// Checks the content is non-blank and within [`MAX_CONTENT_CHARS`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] describing the first failed check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        let len = self.content.chars().count();
        if len > MAX_CONTENT_CHARS {
            return Err(ValidationError::TooLong {
                len,
                max: MAX_CONTENT_CHARS,
            });
        }
        Ok(())
    }
}
