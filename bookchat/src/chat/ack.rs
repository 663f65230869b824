//! Acknowledgment plumbing for emissions that expect a server reply.
//!
//! The transport resolves a one-shot sender once per acknowledged emission.
//! [`emit_with_ack`] turns that callback into an awaitable, optionally
//! bounded by a timeout.

use std::time::Duration;

use tokio::sync::oneshot;

use bookchat_proto::event::{ClientEvent, SendAck};

use crate::transport::{Transport, TransportError};

use super::SendError;

/// Fallback rejection reason when the server gives none.
const DEFAULT_REJECT_REASON: &str = "rejected by server";

/// Emit `event` and wait for its acknowledgment.
///
/// # Errors
///
/// - [`SendError::Transport`] if the transport refuses the emission, or
///   drops the acknowledgment handle (connection lost mid-flight).
/// - [`SendError::AckTimeout`] if `timeout` elapses first.
pub(crate) async fn emit_with_ack<T: Transport>(
    transport: &T,
    event: ClientEvent,
    timeout: Option<Duration>,
) -> Result<SendAck, SendError> {
    let name = event.name();
    let (tx, rx) = oneshot::channel();
    transport.emit(event, Some(tx))?;

    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
            tracing::debug!(event = name, ?limit, "ack timeout expired");
            SendError::AckTimeout
        })?,
        None => rx.await,
    };

    received.map_err(|_| {
        tracing::debug!(event = name, "ack dropped by transport");
        SendError::Transport(TransportError::ConnectionClosed)
    })
}

/// Map an acknowledgment to the caller-facing result.
///
/// # Errors
///
/// Returns [`SendError::SendRejected`] for `{success: false}`.
pub(crate) fn into_result(ack: SendAck) -> Result<(), SendError> {
    if ack.success {
        Ok(())
    } else {
        Err(SendError::SendRejected {
            reason: ack
                .reason
                .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string()),
        })
    }
}
