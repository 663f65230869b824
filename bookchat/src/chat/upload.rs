//! File sharing for [`ChatSession`]: upload to storage, then send a `file`
//! message pointing at the stored resource.
//!
//! Both steps must succeed. If the upload succeeds and the send fails, the
//! stored file is left in place and the failure is logged.

use bookchat_proto::message::MessageType;

use crate::api::{ChatApi, FileUpload, UploadedFile};
use crate::transport::Transport;

use super::{ChatSession, PendingOp, SendError};

impl<T: Transport, A: ChatApi> ChatSession<T, A> {
    /// Upload `file` and share it in the session's room.
    ///
    /// Returns the stored file's location once the `file` message has been
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] while disconnected (nothing is uploaded)
    /// - [`SendError::UploadFailed`] if storage refuses the file
    /// - any error of [`send_message`](Self::send_message) for the follow-up
    ///   `file` message
    pub async fn send_file(&self, file: FileUpload) -> Result<UploadedFile, SendError> {
        let inner = &self.inner;
        inner.ensure_connected()?;
        let _pending = PendingOp::begin(inner);

        let file_name = file.file_name.clone();
        let size = file.bytes.len();
        let uploaded = inner.api.upload_file(file).await.map_err(|e| {
            tracing::warn!(file_name = %file_name, size, error = %e, "upload failed");
            SendError::UploadFailed(e.to_string())
        })?;
        tracing::debug!(file_name = %file_name, url = %uploaded.url, "upload stored");

        let message = inner.outgoing(uploaded.url.clone(), MessageType::File, Some(file_name));
        if let Err(e) = inner.send(message).await {
            tracing::warn!(
                url = %uploaded.url,
                error = %e,
                "file stored but message not sent; upload orphaned"
            );
            return Err(e);
        }
        Ok(uploaded)
    }
}
