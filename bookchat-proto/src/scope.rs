//! Room scoping and connection authentication payloads.
//!
//! A chat session is scoped either to a booking or to a gig. When both ids
//! are known the booking wins: a confirmed booking supersedes the gig
//! conversation that led to it.

use serde::{Deserialize, Serialize};

use crate::message::{BookingId, GigId, UserId};

/// The `{bookingId, gigId}` pair carried by typing signals and history
/// requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomScope {
    /// Booking the conversation belongs to.
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    /// Gig the conversation belongs to.
    #[serde(default)]
    pub gig_id: Option<GigId>,
}

/// The single server-side room a session joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Room for a booking's participants.
    Booking(BookingId),
    /// Room for a gig's pre-booking conversation.
    Gig(GigId),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Booking(id) => write!(f, "booking:{id}"),
            Self::Gig(id) => write!(f, "gig:{id}"),
        }
    }
}

impl RoomScope {
    /// Creates a scope from optional booking and gig ids.
    #[must_use]
    pub const fn new(booking_id: Option<BookingId>, gig_id: Option<GigId>) -> Self {
        Self { booking_id, gig_id }
    }

    /// Resolves the room to join. Booking takes precedence over gig.
    #[must_use]
    pub fn room(&self) -> Option<Room> {
        match (&self.booking_id, &self.gig_id) {
            (Some(booking), _) => Some(Room::Booking(booking.clone())),
            (None, Some(gig)) => Some(Room::Gig(gig.clone())),
            (None, None) => None,
        }
    }
}

/// Credentials presented when the transport connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// The authenticated local user.
    pub user_id: UserId,
    /// Booking scope, if any.
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    /// Gig scope, if any.
    #[serde(default)]
    pub gig_id: Option<GigId>,
}

impl AuthPayload {
    /// Returns the room scope carried by these credentials.
    #[must_use]
    pub fn scope(&self) -> RoomScope {
        RoomScope::new(self.booking_id.clone(), self.gig_id.clone())
    }
}
