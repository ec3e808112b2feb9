//! Pending-operation log for optimistic mutations.
//!
//! Each local mutation registers the operation that undoes it under a fresh
//! [`OpToken`]. The token travels with the CRUD request as its idempotency
//! key; the request's outcome later confirms (drop the entry) or rolls back
//! (apply the inverse) the mutation.

use std::fmt;
use std::time::{Duration, Instant};

use frames::Card;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-generated id of one optimistic mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpToken(Uuid);

impl OpToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OpToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The operation that restores the state a mutation replaced.
#[derive(Clone, Debug, PartialEq)]
pub enum Inverse {
    /// Put a card back in `list_id` at `position`.
    MoveCard { card_id: Uuid, list_id: Uuid, position: i64 },
    MoveList { list_id: Uuid, position: i64 },
    RenameBoard { name: String },
    RenameList { list_id: Uuid, name: String },
    /// Restore a card's content fields; placement is left alone.
    RestoreCard(Card),
    RemoveCard { card_id: Uuid },
    RemoveList { list_id: Uuid },
    /// Re-insert a deleted card at its former rank.
    InsertCard(Card),
}

#[derive(Clone, Debug)]
pub struct PendingOp {
    pub inverse: Inverse,
    pub created_at: Instant,
}

/// Pending operations in the order they were applied.
#[derive(Debug, Default)]
pub struct PendingLog {
    entries: Vec<(OpToken, PendingOp)>,
}

impl PendingLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `inverse` under a fresh token.
    pub fn push(&mut self, inverse: Inverse) -> OpToken {
        let token = OpToken::new();
        self.entries.push((token, PendingOp { inverse, created_at: Instant::now() }));
        token
    }

    /// Remove and return the entry for `token`.
    pub fn take(&mut self, token: OpToken) -> Option<PendingOp> {
        let index = self.entries.iter().position(|(t, _)| *t == token)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn get(&self, token: OpToken) -> Option<&PendingOp> {
        self.entries.iter().find(|(t, _)| *t == token).map(|(_, op)| op)
    }

    #[must_use]
    pub fn contains(&self, token: OpToken) -> bool {
        self.get(token).is_some()
    }

    /// Tokens older than `max_age`, oldest first. Callers treat these as
    /// requests that never answered.
    #[must_use]
    pub fn older_than(&self, max_age: Duration) -> Vec<OpToken> {
        self.entries
            .iter()
            .filter(|(_, op)| op.created_at.elapsed() >= max_age)
            .map(|(t, _)| *t)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
