//! Client reconciliation store: the local copy of one board.
//!
//! DESIGN
//! ======
//! Two sources mutate the snapshot:
//! - local intent: applied immediately, each recorded in the pending log with
//!   the operation that undoes it
//! - inbound domain events: a peer's change, or the echo of our own
//!
//! Both go through the same private placement helpers and the position
//! allocator, so a local move and a peer's move of the same card produce the
//! same structure. Concurrent moves of one card resolve by event arrival
//! order (last writer wins).
//!
//! ERROR HANDLING
//! ==============
//! Local mutations on unknown ids return [`StoreError`] and change nothing.
//! Inbound events that name an unknown card or list are skipped and mark the
//! store stale: a missed event is the likely cause, and only a snapshot
//! refetch (`replace_snapshot`) clears the flag.

use frames::{Board, BoardSnapshot, Card, DomainEvent, ErrorCode, EventPayload, List, Member, Role};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pending::{Inverse, OpToken, PendingLog};
use crate::position;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("card not found: {0}")]
    CardNotFound(Uuid),
    #[error("list not found: {0}")]
    ListNotFound(Uuid),
    #[error("id already present: {0}")]
    Duplicate(Uuid),
    #[error("no pending operation for token {0}")]
    UnknownToken(OpToken),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::CardNotFound(_) => "E_CARD_NOT_FOUND",
            Self::ListNotFound(_) => "E_LIST_NOT_FOUND",
            Self::Duplicate(_) => "E_DUPLICATE_ID",
            Self::UnknownToken(_) => "E_UNKNOWN_TOKEN",
        }
    }
}

/// How an inbound event affected the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Already reflected locally (e.g. the echo of our own delete).
    Unchanged,
    /// Event belongs to a different board.
    OtherBoard,
    /// Event named a card or list the snapshot lacks; the store is now stale.
    UnknownTarget,
}

#[derive(Debug)]
pub struct BoardStore {
    snapshot: BoardSnapshot,
    pending: PendingLog,
    stale: bool,
}

impl BoardStore {
    /// Take ownership of a freshly loaded snapshot, normalizing positions.
    #[must_use]
    pub fn new(mut snapshot: BoardSnapshot) -> Self {
        normalize_snapshot(&mut snapshot);
        Self { snapshot, pending: PendingLog::new(), stale: false }
    }

    #[must_use]
    pub fn snapshot(&self) -> &BoardSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.snapshot.board.id
    }

    #[must_use]
    pub fn pending(&self) -> &PendingLog {
        &self.pending
    }

    /// True once an event referenced state this store never saw.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Flag the snapshot as behind the server, e.g. after an event was lost.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Swap in a refetched snapshot. Pending operations are dropped: the
    /// server copy already reflects whichever of them succeeded.
    pub fn replace_snapshot(&mut self, mut snapshot: BoardSnapshot) {
        normalize_snapshot(&mut snapshot);
        self.snapshot = snapshot;
        self.pending.clear();
        self.stale = false;
    }

    // =========================================================================
    // LOCAL MUTATIONS
    // =========================================================================

    /// # Errors
    ///
    /// [`StoreError::CardNotFound`] or [`StoreError::ListNotFound`].
    pub fn move_card(&mut self, card_id: Uuid, to_list_id: Uuid, position: i64) -> Result<OpToken, StoreError> {
        let (list_id, position) = self.place_card(card_id, to_list_id, position)?;
        Ok(self.pending.push(Inverse::MoveCard { card_id, list_id, position }))
    }

    /// # Errors
    ///
    /// [`StoreError::ListNotFound`].
    pub fn move_list(&mut self, list_id: Uuid, position: i64) -> Result<OpToken, StoreError> {
        let position = self.place_list(list_id, position)?;
        Ok(self.pending.push(Inverse::MoveList { list_id, position }))
    }

    pub fn rename_board(&mut self, name: impl Into<String>) -> OpToken {
        let name = std::mem::replace(&mut self.snapshot.board.name, name.into());
        self.pending.push(Inverse::RenameBoard { name })
    }

    /// # Errors
    ///
    /// [`StoreError::ListNotFound`].
    pub fn rename_list(&mut self, list_id: Uuid, name: impl Into<String>) -> Result<OpToken, StoreError> {
        let name = self.set_list_name(list_id, name.into())?;
        Ok(self.pending.push(Inverse::RenameList { list_id, name }))
    }

    /// Replace a card's content (title, description, due date). Placement
    /// is unchanged; use [`Self::move_card`] for that.
    ///
    /// # Errors
    ///
    /// [`StoreError::CardNotFound`].
    pub fn update_card(&mut self, card: &Card) -> Result<OpToken, StoreError> {
        let previous = self.replace_card_content(card)?;
        Ok(self.pending.push(Inverse::RestoreCard(previous)))
    }

    /// Insert a client-created card at its `position` within `card.list_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] or [`StoreError::ListNotFound`].
    pub fn add_card(&mut self, card: Card) -> Result<OpToken, StoreError> {
        if self.snapshot.find_card(card.id).is_some() {
            return Err(StoreError::Duplicate(card.id));
        }
        let card_id = card.id;
        self.insert_card(card)?;
        Ok(self.pending.push(Inverse::RemoveCard { card_id }))
    }

    /// # Errors
    ///
    /// [`StoreError::Duplicate`].
    pub fn add_list(&mut self, list: List) -> Result<OpToken, StoreError> {
        if self.list_index(list.id).is_some() {
            return Err(StoreError::Duplicate(list.id));
        }
        let list_id = list.id;
        self.insert_list(list);
        Ok(self.pending.push(Inverse::RemoveList { list_id }))
    }

    /// # Errors
    ///
    /// [`StoreError::CardNotFound`].
    pub fn delete_card(&mut self, card_id: Uuid) -> Result<OpToken, StoreError> {
        let removed = self.remove_card(card_id)?;
        Ok(self.pending.push(Inverse::InsertCard(removed)))
    }

    // =========================================================================
    // CONFIRM / ROLLBACK
    // =========================================================================

    /// The CRUD request for `token` succeeded. Returns whether it was pending.
    pub fn confirm(&mut self, token: OpToken) -> bool {
        self.pending.take(token).is_some()
    }

    /// The CRUD request for `token` failed: apply its inverse to the current
    /// state. If a later event removed what the inverse needs, the store is
    /// marked stale.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownToken`] if nothing is pending under `token`, or
    /// the lookup error that prevented the inverse from applying.
    pub fn rollback(&mut self, token: OpToken) -> Result<(), StoreError> {
        let op = self.pending.take(token).ok_or(StoreError::UnknownToken(token))?;
        let result = match op.inverse {
            Inverse::MoveCard { card_id, list_id, position } => self.place_card(card_id, list_id, position).map(drop),
            Inverse::MoveList { list_id, position } => self.place_list(list_id, position).map(drop),
            Inverse::RenameBoard { name } => {
                self.snapshot.board.name = name;
                Ok(())
            }
            Inverse::RenameList { list_id, name } => self.set_list_name(list_id, name).map(drop),
            Inverse::RestoreCard(card) => self.replace_card_content(&card).map(drop),
            Inverse::RemoveCard { card_id } => self.remove_card(card_id).map(drop),
            Inverse::RemoveList { list_id } => self.remove_list(list_id).map(drop),
            Inverse::InsertCard(card) => {
                if self.snapshot.find_card(card.id).is_some() {
                    Ok(())
                } else {
                    self.insert_card(card)
                }
            }
        };

        if let Err(e) = &result {
            warn!(%token, error = %e, "store: rollback could not apply; marking stale");
            self.stale = true;
        }
        result
    }

    // =========================================================================
    // INBOUND EVENTS
    // =========================================================================

    /// Reconcile one inbound domain event.
    pub fn apply_event(&mut self, event: &DomainEvent) -> Applied {
        if event.board_id != self.snapshot.board.id {
            return Applied::OtherBoard;
        }

        let result = match &event.payload {
            EventPayload::BoardUpdated(board) => Ok(self.apply_board(board)),
            EventPayload::CardCreated(card) => self.upsert_card(card.clone()).map(|()| Applied::Changed),
            EventPayload::CardUpdated(card) => self.replace_card_content(card).map(|_| Applied::Changed),
            EventPayload::CardMoved(mv) => self
                .place_card(mv.card_id, mv.to_list_id, mv.position)
                .map(|_| Applied::Changed),
            EventPayload::CardDeleted(entity) => match self.remove_card(entity.id) {
                Ok(_) => Ok(Applied::Changed),
                Err(StoreError::CardNotFound(_)) => Ok(Applied::Unchanged),
                Err(e) => Err(e),
            },
            EventPayload::ListCreated(list) => {
                self.upsert_list(list.clone());
                Ok(Applied::Changed)
            }
            EventPayload::ListUpdated(list) => self.set_list_name(list.id, list.name.clone()).map(|_| Applied::Changed),
            EventPayload::ListMoved(mv) => self.place_list(mv.list_id, mv.position).map(|_| Applied::Changed),
            EventPayload::MemberJoined(change) => {
                self.upsert_member(change.user_id, change.role);
                Ok(Applied::Changed)
            }
            EventPayload::MemberLeft(change) => {
                self.snapshot.members.retain(|m| m.user_id != change.user_id);
                Ok(Applied::Changed)
            }
        };

        match result {
            Ok(applied) => {
                debug!(board_id = %event.board_id, kind = %event.kind(), ?applied, "store: event applied");
                applied
            }
            Err(e) => {
                warn!(board_id = %event.board_id, kind = %event.kind(), error = %e, "store: event target unknown; marking stale");
                self.stale = true;
                Applied::UnknownTarget
            }
        }
    }

    // =========================================================================
    // PLACEMENT HELPERS
    // =========================================================================

    fn list_index(&self, list_id: Uuid) -> Option<usize> {
        self.snapshot.lists.iter().position(|l| l.id == list_id)
    }

    /// Move a card; returns the `(list_id, position)` it left.
    fn place_card(&mut self, card_id: Uuid, to_list_id: Uuid, position: i64) -> Result<(Uuid, i64), StoreError> {
        let (from, card_index) = self.snapshot.find_card(card_id).ok_or(StoreError::CardNotFound(card_id))?;
        let to = self.list_index(to_list_id).ok_or(StoreError::ListNotFound(to_list_id))?;

        let lists = &mut self.snapshot.lists;
        let origin = (lists[from].id, lists[from].cards[card_index].position);

        if from == to {
            position::move_within(&mut lists[from].cards, card_id, position);
        } else {
            let (_, mut card) =
                position::remove(&mut lists[from].cards, card_id).ok_or(StoreError::CardNotFound(card_id))?;
            card.list_id = to_list_id;
            position::insert_ranked(&mut lists[to].cards, card, position);
        }
        Ok(origin)
    }

    /// Move a list; returns the position it left.
    fn place_list(&mut self, list_id: Uuid, position: i64) -> Result<i64, StoreError> {
        let index = self.list_index(list_id).ok_or(StoreError::ListNotFound(list_id))?;
        let origin = self.snapshot.lists[index].position;
        position::move_within(&mut self.snapshot.lists, list_id, position);
        Ok(origin)
    }

    fn set_list_name(&mut self, list_id: Uuid, name: String) -> Result<String, StoreError> {
        let list = self
            .snapshot
            .lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .ok_or(StoreError::ListNotFound(list_id))?;
        Ok(std::mem::replace(&mut list.name, name))
    }

    /// Overwrite content fields; returns the card as it was.
    fn replace_card_content(&mut self, card: &Card) -> Result<Card, StoreError> {
        let (li, ci) = self.snapshot.find_card(card.id).ok_or(StoreError::CardNotFound(card.id))?;
        let current = &mut self.snapshot.lists[li].cards[ci];
        let previous = current.clone();
        current.title.clone_from(&card.title);
        current.description.clone_from(&card.description);
        current.due_date.clone_from(&card.due_date);
        Ok(previous)
    }

    fn insert_card(&mut self, card: Card) -> Result<(), StoreError> {
        let index = self.list_index(card.list_id).ok_or(StoreError::ListNotFound(card.list_id))?;
        let target = card.position;
        position::insert_ranked(&mut self.snapshot.lists[index].cards, card, target);
        Ok(())
    }

    fn insert_list(&mut self, mut list: List) {
        for card in &mut list.cards {
            card.list_id = list.id;
        }
        position::normalize(&mut list.cards);
        let target = list.position;
        position::insert_ranked(&mut self.snapshot.lists, list, target);
    }

    /// Created events double as echoes of our own adds: an id we already
    /// hold only refreshes content.
    fn upsert_card(&mut self, card: Card) -> Result<(), StoreError> {
        if self.snapshot.find_card(card.id).is_some() {
            return self.replace_card_content(&card).map(drop);
        }
        self.insert_card(card)
    }

    fn upsert_list(&mut self, list: List) {
        if let Some(existing) = self.snapshot.lists.iter_mut().find(|l| l.id == list.id) {
            existing.name = list.name;
        } else {
            self.insert_list(list);
        }
    }

    fn remove_card(&mut self, card_id: Uuid) -> Result<Card, StoreError> {
        let (li, _) = self.snapshot.find_card(card_id).ok_or(StoreError::CardNotFound(card_id))?;
        position::remove(&mut self.snapshot.lists[li].cards, card_id)
            .map(|(_, card)| card)
            .ok_or(StoreError::CardNotFound(card_id))
    }

    fn remove_list(&mut self, list_id: Uuid) -> Result<List, StoreError> {
        position::remove(&mut self.snapshot.lists, list_id)
            .map(|(_, list)| list)
            .ok_or(StoreError::ListNotFound(list_id))
    }

    fn apply_board(&mut self, board: &Board) -> Applied {
        if board.id != self.snapshot.board.id {
            return Applied::Unchanged;
        }
        self.snapshot.board = board.clone();
        Applied::Changed
    }

    fn upsert_member(&mut self, user_id: Uuid, role: Option<Role>) {
        match self.snapshot.members.iter_mut().find(|m| m.user_id == user_id) {
            Some(member) => {
                if let Some(role) = role {
                    member.role = role;
                }
            }
            None => self.snapshot.members.push(Member { user_id, role: role.unwrap_or(Role::Viewer) }),
        }
    }
}

fn normalize_snapshot(snapshot: &mut BoardSnapshot) {
    position::normalize(&mut snapshot.lists);
    for list in &mut snapshot.lists {
        for card in &mut list.cards {
            card.list_id = list.id;
        }
        position::normalize(&mut list.cards);
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
