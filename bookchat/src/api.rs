//! REST collaborator: chat history and file storage.
//!
//! [`ChatApi`] is the seam the session uses for the two HTTP calls it makes.
//! [`HttpChatApi`] implements it with reqwest against:
//!
//! - `GET  {base}/api/chat/messages?userId=..&bookingId=..&gigId=..`
//! - `POST {base}/api/chat/upload` (multipart, field `file`) → `{"url": ..}`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use bookchat_proto::message::{ChatMessage, UserId};
use bookchat_proto::scope::RoomScope;

/// Errors returned by the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The configured base URL could not be parsed or joined.
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request could not be sent or the body could not be decoded.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Reading a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Name presented to the other participant.
    pub file_name: String,
    /// MIME type, when known.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Create an upload from in-memory bytes.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).map(str::to_string);
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Override the guessed MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Io`] if the file cannot be read.
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }
}

/// Guess a MIME type from a file extension.
fn guess_content_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    /// Where the stored file can be fetched.
    pub url: String,
}

/// History responses are either a bare array or wrapped in `{messages}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    Bare(Vec<ChatMessage>),
    Wrapped { messages: Vec<ChatMessage> },
}

impl HistoryBody {
    fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            Self::Bare(messages) | Self::Wrapped { messages } => messages,
        }
    }
}

/// History and file-storage endpoints used by the chat session.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch the room's prior messages in server order.
    fn fetch_history(
        &self,
        user_id: &UserId,
        scope: &RoomScope,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, ApiError>> + Send;

    /// Store a file and return where it can be fetched.
    fn upload_file(
        &self,
        file: FileUpload,
    ) -> impl std::future::Future<Output = Result<UploadedFile, ApiError>> + Send;
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpChatApi {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] for an unparsable URL, or
    /// [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base_url = url::Url::parse(base_url)?;
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Resolve an endpoint path against the base URL.
    fn endpoint(&self, path: &str) -> Result<url::Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }
}

/// Turn a non-success response into [`ApiError::Status`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

impl ChatApi for HttpChatApi {
    async fn fetch_history(
        &self,
        user_id: &UserId,
        scope: &RoomScope,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let url = self.endpoint("api/chat/messages")?;
        let mut query = vec![("userId", user_id.as_str())];
        if let Some(booking) = &scope.booking_id {
            query.push(("bookingId", booking.as_str()));
        }
        if let Some(gig) = &scope.gig_id {
            query.push(("gigId", gig.as_str()));
        }

        let response = self.client.get(url).query(&query).send().await?;
        let response = check_status(response).await?;
        let messages = response.json::<HistoryBody>().await?.into_messages();
        tracing::debug!(count = messages.len(), "history fetched");
        Ok(messages)
    }

    async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile, ApiError> {
        let url = self.endpoint("api/chat/upload")?;
        let size = file.bytes.len();
        let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self.client.post(url).multipart(form).send().await?;
        let response = check_status(response).await?;
        let uploaded = response.json::<UploadedFile>().await?;
        tracing::debug!(url = %uploaded.url, size, "file uploaded");
        Ok(uploaded)
    }
}
