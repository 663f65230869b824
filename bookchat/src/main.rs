//! `BookChat`: line-oriented chat client for a booking conversation.
//!
//! Connects to a chat server, prints the conversation, and sends each line
//! typed on stdin. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/bookchat/config.toml`).
//!
//! ```bash
//! cargo run --bin bookchat -- --ws-url ws://127.0.0.1:9100/ws \
//!     --api-url http://127.0.0.1:9100 --user-id alice --booking-id b1
//! ```
//!
//! Commands: `/file <path>`, `/read <id>`, `/read-all`, `/typing`, `/stop`,
//! `/connect`, `/history`, `/quit`. Anything else is sent as a message.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use bookchat::api::{FileUpload, HttpChatApi};
use bookchat::chat::{ChatSession, SessionEvent};
use bookchat::config::{CliArgs, ClientConfig};
use bookchat::transport::websocket::WsTransport;
use bookchat_proto::message::{ChatMessage, MessageId, MessageType};

type Session = ChatSession<WsTransport, HttpChatApi>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout is the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let (Some(ws_url), Some(api_url)) = (config.ws_url.clone(), config.api_url.clone()) else {
        return Err(io::Error::other(
            "both --ws-url and --api-url (or the [server] config keys) are required",
        ));
    };
    let Some(identity) = config.to_session_identity() else {
        return Err(io::Error::other("--user-id is required"));
    };

    tracing::info!(user_id = %identity.user_id, %ws_url, %api_url, "bookchat starting");

    let transport = WsTransport::new(ws_url, config.reconnect.clone())
        .with_connect_timeout(config.connect_timeout);
    let api = HttpChatApi::new(&api_url, config.http_timeout).map_err(io::Error::other)?;
    let (session, events) = ChatSession::open(identity, transport, api, config.session.clone());
    let session = Arc::new(session);

    let result = run(Arc::clone(&session), events).await;

    session.close();
    tracing::info!("bookchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("bookchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Interleave stdin commands with session notifications until `/quit` or EOF.
async fn run(session: Arc<Session>, mut events: mpsc::Receiver<SessionEvent>) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed: HashSet<MessageId> = HashSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, line.trim(), &mut printed) {
                    break;
                }
            }
            Some(event) = events.recv() => {
                render_event(&session, &event, &mut printed);
            }
        }
    }
    Ok(())
}

/// Execute one input line. Returns `false` to quit.
fn handle_line(session: &Arc<Session>, line: &str, printed: &mut HashSet<MessageId>) -> bool {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();

    match command {
        "" => {}
        "/quit" => return false,
        "/connect" => {
            if let Err(e) = session.connect() {
                println!("! {e}");
            }
        }
        "/typing" => session.start_typing(),
        "/stop" => session.stop_typing(),
        "/history" => {
            printed.clear();
            print_new_messages(session, printed);
        }
        "/read" => {
            if !session.mark_as_read(&MessageId::new(arg)) {
                println!("! no message with id {arg}");
            }
        }
        "/read-all" => {
            let me = &session.identity().user_id;
            for message in session.messages() {
                if !message.read && message.sender_id != *me {
                    session.mark_as_read(&message.id);
                }
            }
        }
        "/file" => {
            let session = Arc::clone(session);
            let path = arg.to_string();
            tokio::spawn(async move {
                let outcome = match FileUpload::from_path(Path::new(&path)).await {
                    Ok(file) => session.send_file(file).await.map(|_| ()).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(e) = outcome {
                    println!("! could not share {path}: {e}");
                }
            });
        }
        _ => {
            session.stop_typing();
            let session = Arc::clone(session);
            let content = line.to_string();
            tokio::spawn(async move {
                if let Err(e) = session.send_message(content).await {
                    println!("! not sent: {e}");
                }
            });
        }
    }
    true
}

fn render_event(session: &Session, event: &SessionEvent, printed: &mut HashSet<MessageId>) {
    match event {
        SessionEvent::MessagesChanged => print_new_messages(session, printed),
        SessionEvent::TypingChanged => {
            let typing = session.typing();
            if !typing.is_empty() {
                let names: Vec<_> = typing.iter().map(ToString::to_string).collect();
                println!("… {} typing", names.join(", "));
            }
        }
        SessionEvent::ConnectionChanged(true) => println!("* connected"),
        SessionEvent::ConnectionChanged(false) => println!("* disconnected"),
        SessionEvent::ErrorChanged(Some(fault)) => println!("! {fault}"),
        SessionEvent::ErrorChanged(None) | SessionEvent::LoadingChanged(_) => {}
    }
}

fn print_new_messages(session: &Session, printed: &mut HashSet<MessageId>) {
    for message in session.messages() {
        if printed.insert(message.id.clone()) {
            println!("{}", format_message(&message));
        }
    }
}

fn format_message(message: &ChatMessage) -> String {
    let time = message.timestamp.format("%H:%M");
    let body = match message.kind {
        MessageType::File | MessageType::Image => format!(
            "[{}] {}",
            message.file_name.as_deref().unwrap_or("file"),
            message.content
        ),
        MessageType::System | MessageType::BookingUpdate => format!("({})", message.content),
        MessageType::Text => message.content.clone(),
    };
    format!("{time} {} [{}]: {body}", message.sender_id, message.id)
}
