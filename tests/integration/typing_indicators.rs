//! Integration tests for local and remote typing indicators.
//!
//! All tests run on a paused clock, so timer deadlines are exact.
//!
//! Verifies:
//! 1. A burst of keystrokes emits one `typing` and, 3000 ms after the last
//!    keystroke, one `stop_typing`.
//! 2. An explicit stop emits exactly one `stop_typing` for the episode.
//! 3. `close()` cancels the timer without emitting.
//! 4. Nothing is emitted while disconnected.

use std::time::Duration;

use bookchat::api::{ApiError, ChatApi, FileUpload, UploadedFile};
use bookchat::chat::{ChatSession, SessionIdentity};
use bookchat::config::SessionConfig;
use bookchat::transport::loopback::{LoopbackPeer, LoopbackTransport};

use bookchat_proto::event::{ClientEvent, ServerEvent};
use bookchat_proto::message::{BookingId, ChatMessage, UserId};
use bookchat_proto::scope::RoomScope;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct EmptyApi;

impl ChatApi for EmptyApi {
    async fn fetch_history(
        &self,
        _user_id: &UserId,
        _scope: &RoomScope,
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

const TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

fn scope() -> RoomScope {
    RoomScope::new(Some(BookingId::new("b1")), None)
}

fn open() -> (Session, LoopbackPeer) {
    let (transport, peer) = LoopbackTransport::create_pair();
    let (session, _events) = ChatSession::open(
        SessionIdentity::new("alice").with_booking("b1"),
        transport,
        EmptyApi,
        SessionConfig::default(),
    );
    (session, peer)
}

async fn wait_until(session: &Session, probe: impl Fn(&Session) -> bool) {
    for _ in 0..200 {
        if probe(session) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn connected() -> (Session, LoopbackPeer) {
    let (session, mut peer) = open();
    peer.connect_ok();
    wait_until(&session, |s| s.connected() && !s.loading()).await;
    peer.drain_events();
    (session, peer)
}

/// The next emission, or `None` if nothing arrives within a minute of
/// (paused) time.
async fn next_event(peer: &mut LoopbackPeer) -> Option<ClientEvent> {
    tokio::time::timeout(Duration::from_secs(60), peer.next_emission())
        .await
        .ok()
        .flatten()
        .map(|emission| emission.event)
}

fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_keystroke_stops_after_timeout() {
    let (session, mut peer) = connected().await;
    let start = Instant::now();

    session.start_typing();
    assert_eq!(peer.drain_events(), vec![ClientEvent::Typing(scope())]);

    assert_eq!(
        next_event(&mut peer).await,
        Some(ClientEvent::StopTyping(scope()))
    );
    assert_elapsed(start, TYPING_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn burst_emits_one_typing_and_one_stop_after_last_keystroke() {
    let (session, mut peer) = connected().await;

    session.start_typing();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    session.start_typing();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    session.start_typing();
    let last_keystroke = Instant::now();

    assert_eq!(peer.drain_events(), vec![ClientEvent::Typing(scope())]);

    assert_eq!(
        next_event(&mut peer).await,
        Some(ClientEvent::StopTyping(scope()))
    );
    assert_elapsed(last_keystroke, TYPING_TIMEOUT);

    assert_eq!(next_event(&mut peer).await, None);
}

#[tokio::test(start_paused = true)]
async fn keystroke_after_stop_starts_new_episode() {
    let (session, mut peer) = connected().await;

    session.start_typing();
    tokio::time::sleep(TYPING_TIMEOUT + Duration::from_millis(500)).await;
    session.start_typing();

    assert_eq!(
        peer.drain_events(),
        vec![
            ClientEvent::Typing(scope()),
            ClientEvent::StopTyping(scope()),
            ClientEvent::Typing(scope()),
        ]
    );
    assert_eq!(
        next_event(&mut peer).await,
        Some(ClientEvent::StopTyping(scope()))
    );
}

#[tokio::test(start_paused = true)]
async fn custom_timeout_is_honored() {
    let (transport, mut peer) = LoopbackTransport::create_pair();
    let config = SessionConfig {
        typing_timeout: Duration::from_millis(750),
        ..SessionConfig::default()
    };
    let (session, _events) = ChatSession::open(
        SessionIdentity::new("alice").with_booking("b1"),
        transport,
        EmptyApi,
        config,
    );
    peer.connect_ok();
    wait_until(&session, |s| s.connected()).await;
    peer.drain_events();

    let start = Instant::now();
    session.start_typing();
    assert_eq!(next_event(&mut peer).await, Some(ClientEvent::Typing(scope())));
    assert_eq!(
        next_event(&mut peer).await,
        Some(ClientEvent::StopTyping(scope()))
    );
    assert_elapsed(start, Duration::from_millis(750));
}

// ---------------------------------------------------------------------------
// Explicit stop, close, disconnect
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn explicit_stop_emits_exactly_one_stop() {
    let (session, mut peer) = connected().await;

    session.start_typing();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    session.stop_typing();
    session.stop_typing();

    assert_eq!(
        peer.drain_events(),
        vec![
            ClientEvent::Typing(scope()),
            ClientEvent::StopTyping(scope())
        ]
    );
    // The cancelled timer never fires.
    assert_eq!(next_event(&mut peer).await, None);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_timer_silently() {
    let (session, mut peer) = connected().await;

    session.start_typing();
    assert_eq!(peer.drain_events(), vec![ClientEvent::Typing(scope())]);
    session.close();

    tokio::time::sleep(TYPING_TIMEOUT * 2).await;
    assert!(peer.drain_events().is_empty());
    assert_eq!(peer.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_while_disconnected_emits_nothing() {
    let (session, mut peer) = open();
    peer.drain_events();

    session.start_typing();
    session.stop_typing();
    tokio::time::sleep(TYPING_TIMEOUT * 2).await;
    assert!(peer.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timer_expiring_while_disconnected_skips_stop() {
    let (session, mut peer) = connected().await;

    session.start_typing();
    assert_eq!(peer.drain_events(), vec![ClientEvent::Typing(scope())]);
    peer.drop_connection("elevator");
    wait_until(&session, |s| !s.connected()).await;

    tokio::time::sleep(TYPING_TIMEOUT * 2).await;
    assert!(peer.drain_events().is_empty());

    // After reconnecting, a keystroke starts a fresh episode.
    peer.connect_ok();
    wait_until(&session, |s| s.connected() && !s.loading()).await;
    peer.drain_events();
    session.start_typing();
    assert_eq!(peer.drain_events(), vec![ClientEvent::Typing(scope())]);
}

// ---------------------------------------------------------------------------
// Remote indicators
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn remote_typists_tracked_until_stop() {
    let (session, peer) = connected().await;

    peer.deliver(ServerEvent::Typing {
        user_id: UserId::new("bob"),
    });
    peer.deliver(ServerEvent::Typing {
        user_id: UserId::new("carol"),
    });
    peer.deliver(ServerEvent::Typing {
        user_id: UserId::new("bob"),
    });
    wait_until(&session, |s| s.typing().len() == 2).await;

    peer.deliver(ServerEvent::StopTyping {
        user_id: UserId::new("bob"),
    });
    wait_until(&session, |s| s.typing() == vec![UserId::new("carol")]).await;

    // Remote state does not expire on the client.
    tokio::time::sleep(TYPING_TIMEOUT * 3).await;
    assert_eq!(session.typing(), vec![UserId::new("carol")]);
}
