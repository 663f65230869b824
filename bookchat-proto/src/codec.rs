//! WebSocket framing for the `BookChat` event transport.
//!
//! Each WebSocket binary message carries exactly one postcard-encoded frame.
//! The client opens with a [`ClientFrame::Handshake`]; the server answers
//! with [`ServerFrame::Connected`] or [`ServerFrame::ConnectError`] and
//! then streams events. Acknowledged emissions carry an `ack_id` that the
//! server echoes back in [`ServerFrame::Ack`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::{ClientEvent, SendAck, ServerEvent};
use crate::scope::AuthPayload;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// First frame on every connection.
    Handshake(AuthPayload),
    /// A named event, optionally awaiting an acknowledgment.
    Emit {
        /// Correlation id for the acknowledgment, if one is wanted.
        ack_id: Option<u64>,
        /// The event itself.
        event: ClientEvent,
    },
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// The handshake was accepted.
    Connected,
    /// The handshake was refused; the server closes the socket next.
    ConnectError {
        /// Why the connection was refused.
        reason: String,
    },
    /// A pushed event.
    Event(ServerEvent),
    /// Acknowledgment of an [`ClientFrame::Emit`] with a matching `ack_id`.
    Ack {
        /// Correlation id from the emission.
        ack_id: u64,
        /// Outcome reported by the server.
        ack: SendAck,
    },
}

/// Encodes a frame into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a frame from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
