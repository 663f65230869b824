//! Integration tests for file sharing (upload, then send a `file` message).
//!
//! Verifies:
//! 1. Upload + acknowledged send resolves with the stored file's URL.
//! 2. A failed upload rejects with `UploadFailed` and emits nothing.
//! 3. A rejected follow-up send fails the whole operation.
//! 4. Nothing is uploaded while disconnected.
//! 5. `loading()` covers the upload and the send.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bookchat::api::{ApiError, ChatApi, FileUpload, UploadedFile};
use bookchat::chat::{ChatSession, SendError, SessionIdentity};
use bookchat::config::SessionConfig;
use bookchat::transport::loopback::{LoopbackPeer, LoopbackTransport};

use bookchat_proto::event::{ClientEvent, SendAck};
use bookchat_proto::message::{ChatMessage, GigId, MessageType, UserId};
use bookchat_proto::scope::RoomScope;

use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Storage stub recording uploads. Clones share state.
#[derive(Clone)]
struct Storage {
    uploads: Arc<Mutex<Vec<FileUpload>>>,
    outcome: Result<String, String>,
    /// When set, uploads wait for a notification before completing.
    gate: Option<Arc<Notify>>,
}

impl Storage {
    fn storing_at(url: &str) -> Self {
        Self {
            uploads: Arc::new(Mutex::new(Vec::new())),
            outcome: Ok(url.to_string()),
            gate: None,
        }
    }

    fn refusing(reason: &str) -> Self {
        Self {
            outcome: Err(reason.to_string()),
            ..Self::storing_at("")
        }
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl ChatApi for Storage {
    async fn fetch_history(
        &self,
        _user_id: &UserId,
        _scope: &RoomScope,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        Ok(Vec::new())
    }

    async fn upload_file(&self, file: FileUpload) -> Result<UploadedFile, ApiError> {
        self.uploads.lock().unwrap().push(file);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome
            .clone()
            .map(|url| UploadedFile { url })
            .map_err(|body| ApiError::Status { status: 413, body })
    }
}

type Session = ChatSession<LoopbackTransport, Storage>;

fn pdf() -> FileUpload {
    FileUpload::new("file.pdf", b"%PDF-1.7 contract".to_vec())
}

async fn wait_until(session: &Session, probe: impl Fn(&Session) -> bool) {
    for _ in 0..200 {
        if probe(session) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}

async fn connected(storage: &Storage) -> (Session, LoopbackPeer) {
    let (transport, mut peer) = LoopbackTransport::create_pair();
    let (session, _events) = ChatSession::open(
        SessionIdentity::new("provider-7").with_gig("g42"),
        transport,
        storage.clone(),
        SessionConfig::default(),
    );
    peer.connect_ok();
    wait_until(&session, |s| s.connected() && !s.loading()).await;
    peer.drain_events();
    (session, peer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_then_acknowledged_send_resolves() {
    let storage = Storage::storing_at("https://x/file.pdf");
    let (session, mut peer) = connected(&storage).await;

    let share = session.send_file(pdf());
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        let event = emission.event.clone();
        emission.acknowledge(SendAck::ok());
        event
    };
    let (result, event) = tokio::join!(share, server);

    let uploaded = result.unwrap();
    assert_eq!(uploaded.url, "https://x/file.pdf");

    let ClientEvent::SendMessage(outgoing) = event else {
        panic!("expected send_message, got {event:?}");
    };
    assert_eq!(outgoing.kind, MessageType::File);
    assert_eq!(outgoing.content, "https://x/file.pdf");
    assert_eq!(outgoing.file_name.as_deref(), Some("file.pdf"));
    assert_eq!(outgoing.gig_id, Some(GigId::new("g42")));
    assert_eq!(outgoing.booking_id, None);

    let uploads = storage.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].content_type.as_deref(), Some("application/pdf"));
    assert!(!session.loading());
}

#[tokio::test]
async fn failed_upload_rejects_without_emitting() {
    let storage = Storage::refusing("file too large");
    let (session, mut peer) = connected(&storage).await;

    let result = session.send_file(pdf()).await;
    match result {
        Err(SendError::UploadFailed(reason)) => assert!(reason.contains("file too large")),
        other => panic!("expected UploadFailed, got {other:?}"),
    }
    assert_eq!(storage.upload_count(), 1);
    assert!(peer.drain_events().is_empty());
    assert!(!session.loading());
}

#[tokio::test]
async fn rejected_file_message_fails_operation() {
    let storage = Storage::storing_at("https://x/file.pdf");
    let (session, mut peer) = connected(&storage).await;

    let share = session.send_file(pdf());
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        emission.acknowledge(SendAck::rejected("attachments disabled for this gig"));
    };
    let (result, ()) = tokio::join!(share, server);

    match result {
        Err(SendError::SendRejected { reason }) => {
            assert_eq!(reason, "attachments disabled for this gig");
        }
        other => panic!("expected SendRejected, got {other:?}"),
    }
    // The stored file is not cleaned up.
    assert_eq!(storage.upload_count(), 1);
}

#[tokio::test]
async fn disconnected_session_uploads_nothing() {
    let storage = Storage::storing_at("https://x/file.pdf");
    let (session, mut peer) = connected(&storage).await;
    peer.drop_connection("offline");
    wait_until(&session, |s| !s.connected()).await;

    let result = session.send_file(pdf()).await;
    assert!(matches!(result, Err(SendError::NotConnected)));
    assert_eq!(storage.upload_count(), 0);
    assert!(peer.drain_events().is_empty());
}

#[tokio::test]
async fn loading_spans_upload_and_send() {
    let gate = Arc::new(Notify::new());
    let storage = Storage {
        gate: Some(Arc::clone(&gate)),
        ..Storage::storing_at("https://x/file.pdf")
    };
    let (session, mut peer) = connected(&storage).await;

    let share = session.send_file(pdf());
    let server = async {
        wait_until(&session, |s| s.loading()).await;
        assert_eq!(storage.upload_count(), 1);
        gate.notify_one();

        let emission = peer.next_emission().await.unwrap();
        assert!(session.loading());
        emission.acknowledge(SendAck::ok());
    };
    let (result, ()) = tokio::join!(share, server);

    result.unwrap();
    assert!(!session.loading());
}

#[tokio::test]
async fn upload_from_disk_uses_file_name() {
    let dir = std::env::temp_dir().join(format!("bookchat-upload-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("floor-plan.png");
    tokio::fs::write(&path, [0x89, b'P', b'N', b'G']).await.unwrap();

    let storage = Storage::storing_at("https://x/floor-plan.png");
    let (session, mut peer) = connected(&storage).await;

    let file = FileUpload::from_path(&path).await.unwrap();
    let share = session.send_file(file);
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        emission.acknowledge(SendAck::ok());
    };
    let (result, ()) = tokio::join!(share, server);
    result.unwrap();

    let uploads = storage.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].file_name, "floor-plan.png");
    assert_eq!(uploads[0].content_type.as_deref(), Some("image/png"));
    assert_eq!(uploads[0].bytes, vec![0x89, b'P', b'N', b'G']);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
