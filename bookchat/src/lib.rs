//! `BookChat`: real-time chat synchronization for booking conversations.
//!
//! The [`chat::ChatSession`] keeps one booking or gig conversation in sync
//! over a [`transport::Transport`], backed by the REST [`api::ChatApi`] for
//! history and file storage.

pub mod api;
pub mod chat;
pub mod config;
pub mod transport;
