//! Domain events: typed notifications of board mutations.
//!
//! DESIGN
//! ======
//! On the wire an event is `{type, board_id, data, user_id, timestamp}`.
//! In memory the `type`/`data` pair is one closed [`EventPayload`] variant,
//! so adding an event kind forces every consumer match to handle it.
//! Decoding rejects a `data` shape that does not fit its `type`.
//!
//! Events are ephemeral: nothing in this crate stores or sequences them.

use std::fmt;

use serde::de::Error as _;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::model::{Board, Card, List, Role, deserialize_position};

// =============================================================================
// KIND
// =============================================================================

/// The fixed enumeration of event `type` strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "board.update")]
    BoardUpdate,
    #[serde(rename = "card.created")]
    CardCreated,
    #[serde(rename = "card.updated")]
    CardUpdated,
    #[serde(rename = "card.moved")]
    CardMoved,
    #[serde(rename = "card.deleted")]
    CardDeleted,
    #[serde(rename = "list.created")]
    ListCreated,
    #[serde(rename = "list.updated")]
    ListUpdated,
    #[serde(rename = "list.moved")]
    ListMoved,
    #[serde(rename = "member.joined")]
    MemberJoined,
    #[serde(rename = "member.left")]
    MemberLeft,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BoardUpdate => "board.update",
            Self::CardCreated => "card.created",
            Self::CardUpdated => "card.updated",
            Self::CardMoved => "card.moved",
            Self::CardDeleted => "card.deleted",
            Self::ListCreated => "list.created",
            Self::ListUpdated => "list.updated",
            Self::ListMoved => "list.moved",
            Self::MemberJoined => "member.joined",
            Self::MemberLeft => "member.left",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// `card.moved` data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMove {
    pub card_id: Uuid,
    pub from_list_id: Uuid,
    pub to_list_id: Uuid,
    #[serde(deserialize_with = "deserialize_position")]
    pub position: i64,
}

/// `list.moved` data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMove {
    pub list_id: Uuid,
    #[serde(deserialize_with = "deserialize_position")]
    pub position: i64,
}

/// `card.deleted` data: just the id of the removed entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: Uuid,
}

/// `member.joined` / `member.left` data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChange {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// One variant per event kind, carrying that kind's exact `data` shape.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    BoardUpdated(Board),
    CardCreated(Card),
    CardUpdated(Card),
    CardMoved(CardMove),
    CardDeleted(EntityRef),
    ListCreated(List),
    ListUpdated(List),
    ListMoved(ListMove),
    MemberJoined(MemberChange),
    MemberLeft(MemberChange),
}

impl EventPayload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BoardUpdated(_) => EventKind::BoardUpdate,
            Self::CardCreated(_) => EventKind::CardCreated,
            Self::CardUpdated(_) => EventKind::CardUpdated,
            Self::CardMoved(_) => EventKind::CardMoved,
            Self::CardDeleted(_) => EventKind::CardDeleted,
            Self::ListCreated(_) => EventKind::ListCreated,
            Self::ListUpdated(_) => EventKind::ListUpdated,
            Self::ListMoved(_) => EventKind::ListMoved,
            Self::MemberJoined(_) => EventKind::MemberJoined,
            Self::MemberLeft(_) => EventKind::MemberLeft,
        }
    }

    /// Decode `data` according to `kind`.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when `data` does not match the shape for `kind`.
    pub fn from_parts(kind: EventKind, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::BoardUpdate => Self::BoardUpdated(serde_json::from_value(data)?),
            EventKind::CardCreated => Self::CardCreated(serde_json::from_value(data)?),
            EventKind::CardUpdated => Self::CardUpdated(serde_json::from_value(data)?),
            EventKind::CardMoved => Self::CardMoved(serde_json::from_value(data)?),
            EventKind::CardDeleted => Self::CardDeleted(serde_json::from_value(data)?),
            EventKind::ListCreated => Self::ListCreated(serde_json::from_value(data)?),
            EventKind::ListUpdated => Self::ListUpdated(serde_json::from_value(data)?),
            EventKind::ListMoved => Self::ListMoved(serde_json::from_value(data)?),
            EventKind::MemberJoined => Self::MemberJoined(serde_json::from_value(data)?),
            EventKind::MemberLeft => Self::MemberLeft(serde_json::from_value(data)?),
        })
    }
}

/// Serializes only the inner `data` of a payload.
struct PayloadData<'a>(&'a EventPayload);

impl Serialize for PayloadData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            EventPayload::BoardUpdated(v) => v.serialize(serializer),
            EventPayload::CardCreated(v) | EventPayload::CardUpdated(v) => v.serialize(serializer),
            EventPayload::CardMoved(v) => v.serialize(serializer),
            EventPayload::CardDeleted(v) => v.serialize(serializer),
            EventPayload::ListCreated(v) | EventPayload::ListUpdated(v) => v.serialize(serializer),
            EventPayload::ListMoved(v) => v.serialize(serializer),
            EventPayload::MemberJoined(v) | EventPayload::MemberLeft(v) => v.serialize(serializer),
        }
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// A board mutation notification as fanned out to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainEvent {
    pub board_id: Uuid,
    /// User whose action produced the event.
    pub user_id: Uuid,
    pub timestamp: OffsetDateTime,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Create an event stamped with the current UTC time.
    #[must_use]
    pub fn new(board_id: Uuid, user_id: Uuid, payload: EventPayload) -> Self {
        Self { board_id, user_id, timestamp: OffsetDateTime::now_utc(), payload }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Read `type` and `board_id` from a frame without decoding `data`.
    ///
    /// Returns `None` unless the frame names a known event kind and a board.
    /// Lets a receiver tell a mangled event (an update it has now missed)
    /// from noise.
    #[must_use]
    pub fn peek_header(text: &str) -> Option<(EventKind, Uuid)> {
        let header: EventHeader = serde_json::from_str(text).ok()?;
        Some((header.kind, header.board_id))
    }
}

#[derive(Deserialize)]
struct EventHeader {
    #[serde(rename = "type")]
    kind: EventKind,
    board_id: Uuid,
}

impl Serialize for DomainEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self.timestamp.format(&Rfc3339).map_err(S::Error::custom)?;
        let mut st = serializer.serialize_struct("DomainEvent", 5)?;
        st.serialize_field("type", &self.kind())?;
        st.serialize_field("board_id", &self.board_id)?;
        st.serialize_field("data", &PayloadData(&self.payload))?;
        st.serialize_field("user_id", &self.user_id)?;
        st.serialize_field("timestamp", &timestamp)?;
        st.end()
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    board_id: Uuid,
    data: serde_json::Value,
    user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

impl<'de> Deserialize<'de> for DomainEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        let payload = EventPayload::from_parts(raw.kind, raw.data)
            .map_err(|e| D::Error::custom(format!("invalid data for {}: {e}", raw.kind)))?;
        Ok(Self { board_id: raw.board_id, user_id: raw.user_id, timestamp: raw.timestamp, payload })
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
