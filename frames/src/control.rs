//! Control messages: connection auth and board subscription.
//!
//! Inbound frames are parsed in two steps so the server can tell an
//! unparseable frame from an unknown `type` from a bad payload for a known
//! `type`. None of these close the channel; they produce an [`ErrorReply`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ErrorCode;
use crate::event::DomainEvent;

// =============================================================================
// INBOUND
// =============================================================================

/// Client → server control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Subscribe {
        #[serde(rename = "boardId")]
        board_id: Uuid,
    },
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidJson(String),
    #[error("invalid message: missing type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} message: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownType(_) => "E_UNKNOWN_TYPE",
            Self::InvalidJson(_) | Self::MissingType | Self::InvalidPayload { .. } => "E_INVALID_MESSAGE",
        }
    }
}

impl ClientMessage {
    /// Every `type` the server accepts.
    pub const TYPES: [&'static str; 3] = ["auth", "subscribe", "unsubscribe"];

    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] describing why the frame was rejected.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(ProtocolError::MissingType);
        };
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_owned()));
        }
        let kind = kind.to_owned();
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload { kind, reason: e.to_string() })
    }

    /// Encode for sending.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Typed reply to a control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// Sent right before the server closes the channel.
    AuthError {
        error: String,
    },
    Subscribed {
        #[serde(rename = "boardId")]
        board_id: Uuid,
    },
}

/// Generic recoverable error reply: `{error, code?, retryable?}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorReply {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), code: None, retryable: false }
    }
}

/// Anything a server may send on the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Reply(ControlReply),
    Event(DomainEvent),
    Error(ErrorReply),
}

impl ServerMessage {
    /// Decode one outbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when the frame matches no known shape.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode for sending.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ControlReply> for ServerMessage {
    fn from(reply: ControlReply) -> Self {
        Self::Reply(reply)
    }
}

impl From<ErrorReply> for ServerMessage {
    fn from(reply: ErrorReply) -> Self {
        Self::Error(reply)
    }
}

impl From<DomainEvent> for ServerMessage {
    fn from(event: DomainEvent) -> Self {
        Self::Event(event)
    }
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;
