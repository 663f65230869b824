//! `BookChat` development server.
//!
//! An axum server speaking the chat protocol over WebSocket (`/ws`) and
//! the history and upload endpoints over REST. State is held in memory.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin bookchat-relay
//!
//! # Run on custom address
//! cargo run --bin bookchat-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! BOOKCHAT_RELAY_ADDR=127.0.0.1:8080 cargo run --bin bookchat-relay
//! ```

use std::sync::Arc;

use bookchat_relay::config::{RelayCliArgs, RelayConfig};
use bookchat_relay::relay::{self, RelayState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_upload_size = config.max_upload_size,
        "starting bookchat server"
    );

    let state = Arc::new(RelayState::with_config(&config));

    match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, public_url = state.public_url(), "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
