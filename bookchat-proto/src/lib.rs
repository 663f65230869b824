//! Shared protocol definitions for the `BookChat` wire format.

pub mod codec;
pub mod event;
pub mod message;
pub mod scope;
