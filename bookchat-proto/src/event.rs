//! Named events exchanged over the chat transport.
//!
//! [`ClientEvent`]s are emitted by the client, optionally with an
//! acknowledgment; [`ServerEvent`]s are pushed by the server to every
//! member of a room.

use serde::{Deserialize, Serialize};

use crate::message::{BookingId, ChatMessage, GigId, MessageId, OutgoingMessage, UserId};
use crate::scope::RoomScope;

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join the room of a booking.
    JoinBookingRoom {
        /// Booking to join.
        booking_id: BookingId,
    },
    /// Join the room of a gig.
    JoinGigRoom {
        /// Gig to join.
        gig_id: GigId,
    },
    /// Post a message to the current room. Acknowledged with a [`SendAck`].
    SendMessage(OutgoingMessage),
    /// The local user started typing.
    Typing(RoomScope),
    /// The local user stopped typing.
    StopTyping(RoomScope),
    /// The local user read a message.
    MarkRead {
        /// Message that was read.
        message_id: MessageId,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinBookingRoom { .. } => "join_booking_room",
            Self::JoinGigRoom { .. } => "join_gig_room",
            Self::SendMessage(_) => "send_message",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A message was posted to the room (including echoes of our own).
    Message(ChatMessage),
    /// A participant started typing.
    Typing {
        /// Who is typing.
        user_id: UserId,
    },
    /// A participant stopped typing.
    StopTyping {
        /// Who stopped typing.
        user_id: UserId,
    },
    /// A participant read a message.
    MessageRead {
        /// Message that was read.
        message_id: MessageId,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::MessageRead { .. } => "message_read",
        }
    }
}

/// Acknowledgment the server returns for an acknowledged emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Whether the server accepted the emission.
    pub success: bool,
    /// Server-supplied reason when `success` is false.
    #[serde(default)]
    pub reason: Option<String>,
}

impl SendAck {
    /// A successful acknowledgment.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    /// A failed acknowledgment carrying `reason`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}
