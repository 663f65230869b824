//! Configuration system for the `BookChat` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/bookchat-relay/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};

use bookchat_proto::message::MAX_CONTENT_CHARS;

/// Errors that can occur when loading relay configuration.
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

    /// A resolved limit is outside what the server can honor.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Config key at fault.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    public_url: Option<String>,
    max_upload_size: Option<usize>,
    max_content_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "BookChat development chat server")]
pub struct RelayCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "BOOKCHAT_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/bookchat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL used in upload responses (default: `http://<bound address>`).
    #[arg(long)]
    pub public_url: Option<String>,

    /// Maximum upload size in bytes.
    #[arg(long)]
    pub max_upload_size: Option<usize>,

    /// Maximum message length in characters.
    #[arg(long)]
    pub max_content_len: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BOOKCHAT_RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Base URL for stored files. Derived from the bound address if unset.
    pub public_url: Option<String>,
    /// Maximum accepted upload body in bytes.
    pub max_upload_size: usize,
    /// Maximum message length in characters.
    pub max_content_len: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            public_url: None,
            max_upload_size: 10 * 1024 * 1024,
            max_content_len: MAX_CONTENT_CHARS,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` path must exist; the default path may be
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a resolved limit is invalid.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Merge CLI args over the file over defaults, then check the limits.
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let server = &file.server;

        let config = Self {
            bind_addr: layered(cli.bind.clone(), server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            public_url: layered(cli.public_url.clone(), server.public_url.clone())
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            max_upload_size: layered(cli.max_upload_size, server.max_upload_size)
                .unwrap_or(defaults.max_upload_size),
            max_content_len: layered(cli.max_content_len, server.max_content_len)
                .unwrap_or(defaults.max_content_len),
            log_level: cli.log_level.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_size == 0 {
            return Err(ConfigError::Invalid {
                key: "max_upload_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_content_len == 0 || self.max_content_len > MAX_CONTENT_CHARS {
            return Err(ConfigError::Invalid {
                key: "max_content_len",
                reason: format!("must be between 1 and {MAX_CONTENT_CHARS}"),
            });
        }
        Ok(())
    }
}

/// First value present, CLI before file.
fn layered<T>(cli: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(file)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Default location: `<config dir>/bookchat-relay/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookchat-relay").join("config.toml"))
}

/// Read the relay config file. Only the default path may be missing.
fn load_config_file(explicit_path: Option<&Path>) -> Result<RelayConfigFile, ConfigError> {
    let (path, required) = match explicit_path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(RelayConfigFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(RelayConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
