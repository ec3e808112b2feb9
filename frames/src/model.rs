//! Board, list, and card representations carried by events and snapshots.
//!
//! These mirror the rows the external data service returns, so serde
//! round-trips against the CRUD layer stay lossless. Positions are integers;
//! whole-number floats are accepted because JavaScript peers emit `1.0`-style
//! numbers.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Board visibility as stored by the data service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Team,
    Public,
}

/// Membership role on a board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
}

/// Board row without its lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    /// Opaque background settings; never inspected here.
    #[serde(default)]
    pub background: Option<serde_json::Value>,
}

/// A task card. `position` is its zero-based rank within `list_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub list_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "deserialize_position")]
    pub position: i64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

/// An ordered column of cards. `cards` is empty on `list.created` payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: Uuid,
    pub board_id: Uuid,
    pub name: String,
    #[serde(deserialize_with = "deserialize_position")]
    pub position: i64,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// A board member and their role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: Uuid,
    pub role: Role,
}

/// Full board view as loaded by a client: board fields, ordered lists with
/// their cards, and the member roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    #[serde(flatten)]
    pub board: Board,
    #[serde(default)]
    pub lists: Vec<List>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl BoardSnapshot {
    #[must_use]
    pub fn new(board: Board) -> Self {
        Self { board, lists: Vec::new(), members: Vec::new() }
    }

    #[must_use]
    pub fn list(&self, list_id: Uuid) -> Option<&List> {
        self.lists.iter().find(|l| l.id == list_id)
    }

    /// Locate a card, returning `(list_index, card_index)`.
    #[must_use]
    pub fn find_card(&self, card_id: Uuid) -> Option<(usize, usize)> {
        self.lists.iter().enumerate().find_map(|(li, list)| {
            list.cards
                .iter()
                .position(|c| c.id == card_id)
                .map(|ci| (li, ci))
        })
    }

    #[must_use]
    pub fn card(&self, card_id: Uuid) -> Option<&Card> {
        let (li, ci) = self.find_card(card_id)?;
        self.lists.get(li)?.cards.get(ci)
    }
}

pub(crate) fn deserialize_position<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            if let Some(float) = number.as_f64()
                && float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64
            {
                return Ok(float as i64);
            }
            Err(D::Error::custom("expected integer-compatible position"))
        }
        _ => Err(D::Error::custom("expected numeric position")),
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
