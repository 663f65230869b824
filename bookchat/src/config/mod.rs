//! Configuration system for the `BookChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/bookchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use bookchat_proto::message::{BookingId, GigId, UserId};

use crate::chat::SessionIdentity;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    chat: ChatFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    ws_url: Option<String>,
    api_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    booking_id: Option<String>,
    gig_id: Option<String>,
    auto_connect: Option<bool>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    typing_timeout_ms: Option<u64>,
    ack_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnection policy for the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Attempts after a failure before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before attempt number `attempt` (1-based): the initial
    /// delay doubled per attempt, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Chat session tuning (used by `ChatSession`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Inactivity window after which a local typing episode ends.
    pub typing_timeout: Duration,
    /// Bound on waiting for a send acknowledgment. `None` waits forever.
    pub ack_timeout: Option<Duration>,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_millis(3000),
            ack_timeout: None,
            event_buffer: 256,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// WebSocket URL of the chat event endpoint.
    pub ws_url: Option<String>,
    /// Base URL of the REST API.
    pub api_url: Option<String>,
    /// Timeout for opening the socket and completing the handshake.
    pub connect_timeout: Duration,
    /// Timeout for REST calls.
    pub http_timeout: Duration,

    // -- Session --
    /// Local user identity.
    pub user_id: Option<String>,
    /// Booking room scope.
    pub booking_id: Option<String>,
    /// Gig room scope.
    pub gig_id: Option<String>,
    /// Connect as soon as the session opens.
    pub auto_connect: bool,

    // -- Chat --
    /// Session tuning.
    pub session: SessionConfig,

    // -- Reconnect --
    /// Transport reconnection policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            api_url: None,
            connect_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(30),
            user_id: None,
            booking_id: None,
            gig_id: None,
            auto_connect: true,
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            ws_url: cli.ws_url.clone().or_else(|| file.server.ws_url.clone()),
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            http_timeout: file
                .server
                .http_timeout_secs
                .map_or(defaults.http_timeout, Duration::from_secs),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            booking_id: cli
                .booking_id
                .clone()
                .or_else(|| file.session.booking_id.clone()),
            gig_id: cli.gig_id.clone().or_else(|| file.session.gig_id.clone()),
            auto_connect: if cli.manual_connect {
                false
            } else {
                file.session.auto_connect.unwrap_or(defaults.auto_connect)
            },
            session: SessionConfig {
                typing_timeout: file
                    .chat
                    .typing_timeout_ms
                    .map_or(defaults.session.typing_timeout, Duration::from_millis),
                ack_timeout: file
                    .chat
                    .ack_timeout_secs
                    .map(Duration::from_secs)
                    .or(defaults.session.ack_timeout),
                event_buffer: file
                    .chat
                    .event_buffer
                    .unwrap_or(defaults.session.event_buffer),
            },
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
        }
    }

    /// Build the [`SessionIdentity`] if a user id is configured.
    ///
    /// Empty id strings are treated as absent.
    #[must_use]
    pub fn to_session_identity(&self) -> Option<SessionIdentity> {
        let user_id = self.user_id.clone().filter(|id| !id.is_empty())?;
        Some(SessionIdentity {
            user_id: UserId::new(user_id),
            booking_id: self
                .booking_id
                .clone()
                .filter(|id| !id.is_empty())
                .map(BookingId::new),
            gig_id: self
                .gig_id
                .clone()
                .filter(|id| !id.is_empty())
                .map(GigId::new),
            auto_connect: self.auto_connect,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Booking chat client")]
pub struct CliArgs {
    /// WebSocket URL of the chat server.
    #[arg(long, env = "BOOKCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL of the chat REST API.
    #[arg(long, env = "BOOKCHAT_API_URL")]
    pub api_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "BOOKCHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Booking whose room to join.
    #[arg(long, env = "BOOKCHAT_BOOKING_ID")]
    pub booking_id: Option<String>,

    /// Gig whose room to join (ignored when a booking is given).
    #[arg(long, env = "BOOKCHAT_GIG_ID")]
    pub gig_id: Option<String>,

    /// Do not connect until `/connect` is entered.
    #[arg(long)]
    pub manual_connect: bool,

    /// Path to config file (default: `~/.config/bookchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BOOKCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/bookchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("bookchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
