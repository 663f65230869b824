//! `BookChat` development server library.
//!
//! Exposes the chat server for use in tests and embedding. The server
//! accepts WebSocket connections, scopes them to booking or gig rooms,
//! stores accepted messages, and serves history and file uploads over REST.

pub mod config;
pub mod http;
pub mod relay;
pub mod rooms;
pub mod store;
