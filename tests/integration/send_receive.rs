//! Integration tests for sending messages and read receipts.
//!
//! Verifies:
//! 1. A send while disconnected rejects with `NotConnected` and never
//!    reaches the transport.
//! 2. A connected send resolves exactly on a successful acknowledgment and
//!    rejects exactly on a failed one.
//! 3. The server echo, not the acknowledgment, adds the message locally.
//! 4. Read receipts flow in both directions.

use std::time::Duration;

use bookchat::api::{ApiError, ChatApi, FileUpload, UploadedFile};
use bookchat::chat::{ChatSession, SendError, SessionIdentity};
use bookchat::config::SessionConfig;
use bookchat::transport::loopback::{LoopbackPeer, LoopbackTransport};

use bookchat_proto::event::{ClientEvent, SendAck, ServerEvent};
use bookchat_proto::message::{
    BookingId, ChatMessage, MessageId, MessageType, OutgoingMessage, UserId, ValidationError,
};

use chrono::Utc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// REST stub with an empty history and no storage.
struct EmptyApi;

impl ChatApi for EmptyApi {
    async fn fetch_history(
        &self,
        _user_id: &UserId,
        _scope: &bookchat_proto::scope::RoomScope,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        Ok(Vec::new())
    }

    async fn upload_file(&self, _file: FileUpload) -> Result<UploadedFile, ApiError> {
        Err(ApiError::Status {
            status: 501,
            body: "uploads disabled".into(),
        })
    }
}

type Session = ChatSession<LoopbackTransport, EmptyApi>;

fn open(identity: SessionIdentity) -> (Session, LoopbackPeer) {
    let (transport, peer) = LoopbackTransport::create_pair();
    let (session, _events) = ChatSession::open(identity, transport, EmptyApi, SessionConfig::default());
    (session, peer)
}

/// Open a booking session for alice, connect it, and discard the join.
async fn connected_alice() -> (Session, LoopbackPeer) {
    let (session, mut peer) = open(SessionIdentity::new("alice").with_booking("b1"));
    peer.connect_ok();
    wait_until(&session, |s| s.connected() && !s.loading()).await;
    peer.drain_events();
    (session, peer)
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

/// The message a server would echo for `outgoing`.
fn echo_of(id: &str, outgoing: &OutgoingMessage) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(id),
        sender_id: UserId::new("alice"),
        recipient_id: UserId::new("bob"),
        content: outgoing.content.clone(),
        kind: outgoing.kind,
        timestamp: Utc::now(),
        read: false,
        file_name: outgoing.file_name.clone(),
    }
}

fn incoming(id: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(id),
        sender_id: UserId::new("bob"),
        recipient_id: UserId::new("alice"),
        content: "are you free on friday?".into(),
        kind: MessageType::Text,
        timestamp: Utc::now(),
        read: false,
        file_name: None,
    }
}

// ---------------------------------------------------------------------------
// Disconnected sends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_before_connect_is_not_connected() {
    let (session, mut peer) = open(SessionIdentity::new("alice").with_booking("b1"));
    peer.drain_events();

    let result = session.send_message("hello").await;
    assert!(matches!(result, Err(SendError::NotConnected)));
    assert!(peer.drain_events().is_empty());
}

#[tokio::test]
async fn send_after_disconnect_leaves_messages_unchanged() {
    let (session, mut peer) = connected_alice().await;
    peer.deliver(ServerEvent::Message(incoming("m1")));
    wait_until(&session, |s| s.messages().len() == 1).await;
    let before = session.messages();

    peer.drop_connection("wifi lost");
    wait_until(&session, |s| !s.connected()).await;

    let result = session.send_message("still there?").await;
    assert!(matches!(result, Err(SendError::NotConnected)));
    assert_eq!(session.messages(), before);
    assert!(peer.drain_events().is_empty());
}

#[tokio::test]
async fn invalid_content_is_rejected_locally() {
    let (session, mut peer) = connected_alice().await;

    let result = session.send_message("   \n").await;
    assert!(matches!(
        result,
        Err(SendError::Validation(ValidationError::Empty))
    ));

    let result = session.send_message("x".repeat(10_001)).await;
    assert!(matches!(
        result,
        Err(SendError::Validation(ValidationError::TooLong { .. }))
    ));
    assert!(peer.drain_events().is_empty());
}

// ---------------------------------------------------------------------------
// Acknowledgments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acknowledged_send_resolves_and_echo_adds_message() {
    let (session, mut peer) = connected_alice().await;

    let send = session.send_message("Can we move to 3pm?");
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        let ClientEvent::SendMessage(outgoing) = emission.event.clone() else {
            panic!("expected send_message, got {:?}", emission.event);
        };
        assert_eq!(outgoing.content, "Can we move to 3pm?");
        assert_eq!(outgoing.kind, MessageType::Text);
        assert_eq!(outgoing.booking_id, Some(BookingId::new("b1")));
        emission.acknowledge(SendAck::ok());
        outgoing
    };
    let (result, outgoing) = tokio::join!(send, server);
    result.unwrap();

    // The acknowledgment alone does not add the message.
    assert!(session.messages().is_empty());

    peer.deliver(ServerEvent::Message(echo_of("srv-1", &outgoing)));
    wait_until(&session, |s| s.messages().len() == 1).await;
    assert_eq!(session.messages()[0].content, "Can we move to 3pm?");
    assert_eq!(session.unread_count(), 0);
}

#[tokio::test]
async fn rejected_ack_rejects_with_reason() {
    let (session, mut peer) = connected_alice().await;

    let send = session.send_message("hello");
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        emission.acknowledge(SendAck::rejected("booking cancelled"));
    };
    let (result, ()) = tokio::join!(send, server);

    match result {
        Err(SendError::SendRejected { reason }) => assert_eq!(reason, "booking cancelled"),
        other => panic!("expected SendRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn each_send_follows_its_own_ack() {
    let (session, mut peer) = connected_alice().await;
    let verdicts = [true, false, true, true, false];

    for (i, accept) in verdicts.iter().copied().enumerate() {
        let send = session.send_message(format!("message {i}"));
        let server = async {
            let emission = peer.next_emission().await.unwrap();
            if accept {
                emission.acknowledge(SendAck::ok());
            } else {
                emission.acknowledge(SendAck::rejected(format!("no {i}")));
            }
        };
        let (result, ()) = tokio::join!(send, server);
        assert_eq!(result.is_ok(), accept, "send {i}");
    }
}

#[tokio::test]
async fn connection_lost_before_ack_fails_send() {
    let (session, mut peer) = connected_alice().await;

    let send = session.send_message("hello");
    let server = async {
        let emission = peer.next_emission().await.unwrap();
        // The link drops before the server answers.
        drop(emission);
    };
    let (result, ()) = tokio::join!(send, server);
    assert!(matches!(result, Err(SendError::Transport(_))));
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn marking_incoming_message_read_notifies_server() {
    let (session, mut peer) = connected_alice().await;
    peer.deliver(ServerEvent::Message(incoming("m1")));
    wait_until(&session, |s| s.unread_count() == 1).await;

    assert!(session.mark_as_read(&MessageId::new("m1")));
    assert_eq!(session.unread_count(), 0);
    assert_eq!(
        peer.drain_events(),
        vec![ClientEvent::MarkRead {
            message_id: MessageId::new("m1")
        }]
    );
}

#[tokio::test]
async fn mark_as_read_while_disconnected_is_local_only() {
    let (session, mut peer) = connected_alice().await;
    peer.deliver(ServerEvent::Message(incoming("m1")));
    wait_until(&session, |s| s.unread_count() == 1).await;
    peer.drop_connection("tunnel");
    wait_until(&session, |s| !s.connected()).await;

    assert!(session.mark_as_read(&MessageId::new("m1")));
    assert!(session.message(&MessageId::new("m1")).unwrap().read);
    assert!(peer.drain_events().is_empty());
}

#[tokio::test]
async fn mark_as_read_unknown_id_changes_nothing() {
    let (session, mut peer) = connected_alice().await;
    peer.deliver(ServerEvent::Message(incoming("m1")));
    wait_until(&session, |s| s.messages().len() == 1).await;
    let before = session.messages();

    assert!(!session.mark_as_read(&MessageId::new("missing")));
    assert_eq!(session.messages(), before);
    assert!(peer.drain_events().is_empty());
}

#[tokio::test]
async fn read_receipt_from_other_party_marks_own_message() {
    let (session, peer) = connected_alice().await;
    let outgoing = OutgoingMessage {
        content: "invoice attached".into(),
        kind: MessageType::Text,
        booking_id: Some(BookingId::new("b1")),
        gig_id: None,
        file_name: None,
    };
    peer.deliver(ServerEvent::Message(echo_of("srv-9", &outgoing)));
    peer.deliver(ServerEvent::MessageRead {
        message_id: MessageId::new("srv-9"),
    });

    wait_until(&session, |s| {
        s.message(&MessageId::new("srv-9")).is_some_and(|m| m.read)
    })
    .await;
}
