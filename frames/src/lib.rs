//! Shared wire protocol for realtime board synchronization.
//!
//! This crate owns the JSON text-frame representation used by both the
//! websocket server and the sync client. Three families of messages exist:
//!
//! - [`ClientMessage`]: inbound control messages (`auth`, `subscribe`,
//!   `unsubscribe`).
//! - [`ControlReply`] / [`ErrorReply`]: outbound replies to those messages.
//! - [`DomainEvent`]: outbound fire-and-forget board mutations, fanned out
//!   to every subscriber of a board.
//!
//! [`ServerMessage`] is the union a client decodes from any server frame.

pub mod control;
pub mod event;
pub mod model;

pub use control::{ClientMessage, ControlReply, ErrorReply, ProtocolError, ServerMessage};
pub use event::{CardMove, DomainEvent, EntityRef, EventKind, EventPayload, ListMove, MemberChange};
pub use model::{Board, BoardSnapshot, Card, List, Member, Role, Visibility};

/// Grepable error code for structured error replies.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Build a generic error reply from a typed error.
pub fn error_reply(err: &(impl ErrorCode + ?Sized)) -> ErrorReply {
    ErrorReply { error: err.to_string(), code: Some(err.error_code().to_owned()), retryable: err.retryable() }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
