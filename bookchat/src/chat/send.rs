//! Send pipeline for [`ChatSession`].
//!
//! Pipeline steps:
//! 1. Build the [`OutgoingMessage`] for the session's room scope
//! 2. Validate the content (non-blank, within the length limit)
//! 3. Check the connection; refuse with [`SendError::NotConnected`]
//! 4. Emit `send_message` and await the server acknowledgment
//!
//! A successful send does not touch the message store. The message appears
//! when the server echoes it back as a `message` event.

use std::sync::Arc;

use bookchat_proto::event::ClientEvent;
use bookchat_proto::message::{MessageType, OutgoingMessage};

use crate::api::ChatApi;
use crate::transport::Transport;

use super::{ChatSession, Inner, PendingOp, SendError, ack};

impl<T: Transport, A: ChatApi> ChatSession<T, A> {
    /// Send a text message to the session's room.
    ///
    /// Resolves once the server acknowledges the message.
    ///
    /// # Errors
    ///
    /// - [`SendError::Validation`] for blank or oversized content
    /// - [`SendError::NotConnected`] while disconnected (nothing is emitted)
    /// - [`SendError::SendRejected`] if the server refuses the message
    /// - [`SendError::Transport`] or [`SendError::AckTimeout`] if no
    ///   acknowledgment arrives
    pub async fn send_message(&self, content: impl Into<String>) -> Result<(), SendError> {
        let message = self.inner.outgoing(content.into(), MessageType::Text, None);
        message.validate()?;
        self.inner.send(message).await
    }
}

impl<T: Transport, A: ChatApi> Inner<T, A> {
    /// Build an outgoing message scoped to this session's room.
    pub(crate) fn outgoing(
        &self,
        content: String,
        kind: MessageType,
        file_name: Option<String>,
    ) -> OutgoingMessage {
        OutgoingMessage {
            content,
            kind,
            booking_id: self.identity.booking_id.clone(),
            gig_id: self.identity.gig_id.clone(),
            file_name,
        }
    }

    /// Refuse early when closed or disconnected.
    pub(crate) fn ensure_connected(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        if !self.state.lock().connected {
            return Err(SendError::NotConnected);
        }
        Ok(())
    }

    /// Emit `send_message` and map the acknowledgment to a result.
    pub(crate) async fn send(self: &Arc<Self>, message: OutgoingMessage) -> Result<(), SendError> {
        self.ensure_connected()?;
        let _pending = PendingOp::begin(self);

        let kind = message.kind;
        let ack = ack::emit_with_ack(
            &self.transport,
            ClientEvent::SendMessage(message),
            self.config.ack_timeout,
        )
        .await?;

        match ack::into_result(ack) {
            Ok(()) => {
                tracing::debug!(%kind, "message acknowledged");
                Ok(())
            }
            Err(e) => {
                tracing::info!(%kind, error = %e, "message rejected by server");
                Err(e)
            }
        }
    }
}
