//! Position allocator for ordered collections.
//!
//! DESIGN
//! ======
//! Cards within a list and lists within a board share one invariant: after
//! every mutation, positions equal array indices (`0..len`). Every operation
//! here ends with a full renumber, so callers never patch positions by hand.
//!
//! Moves are rank-by-value inserts. The moved item is removed and the
//! remaining items are re-stamped first; the item then goes before the first
//! item whose position is at least the (clamped) target. In a dense
//! collection that lands it at index `target`, regardless of which direction
//! it travelled or how stale its own position value was.

use frames::{Card, List};
use uuid::Uuid;

/// An item with an id and a zero-based rank.
pub trait Positioned {
    fn id(&self) -> Uuid;
    fn position(&self) -> i64;
    fn set_position(&mut self, position: i64);
}

impl Positioned for Card {
    fn id(&self) -> Uuid {
        self.id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

impl Positioned for List {
    fn id(&self) -> Uuid {
        self.id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

// =============================================================================
// PRIMITIVES
// =============================================================================

fn as_position(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// Clamp a requested position into `0..=len`.
#[must_use]
pub fn clamp_target(len: usize, target: i64) -> i64 {
    target.clamp(0, as_position(len))
}

/// Index before the first item whose position is `>= target`; `len` if none.
#[must_use]
pub fn insertion_index<T: Positioned>(items: &[T], target: i64) -> usize {
    items
        .iter()
        .position(|item| item.position() >= target)
        .unwrap_or(items.len())
}

/// Re-stamp every item with its array index.
pub fn renumber<T: Positioned>(items: &mut [T]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.set_position(as_position(index));
    }
}

/// Sort by position (stable for ties) and renumber. Used on snapshot load,
/// where the data service may hand back gaps or duplicates.
pub fn normalize<T: Positioned>(items: &mut [T]) {
    items.sort_by_key(|item| item.position());
    renumber(items);
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Insert `item` at rank `target` and renumber. Returns the landing index.
pub fn insert_ranked<T: Positioned>(items: &mut Vec<T>, item: T, target: i64) -> usize {
    renumber(items);
    let index = insertion_index(items, clamp_target(items.len(), target));
    items.insert(index, item);
    renumber(items);
    index
}

/// Remove the item with `id` and renumber the rest.
/// Returns the index it occupied and the item.
pub fn remove<T: Positioned>(items: &mut Vec<T>, id: Uuid) -> Option<(usize, T)> {
    let index = items.iter().position(|item| item.id() == id)?;
    let item = items.remove(index);
    renumber(items);
    Some((index, item))
}

/// Move an item within one collection. Returns the landing index, or `None`
/// if `id` is not present.
pub fn move_within<T: Positioned>(items: &mut Vec<T>, id: Uuid, target: i64) -> Option<usize> {
    let (_, item) = remove(items, id)?;
    Some(insert_ranked(items, item, target))
}

/// Move an item from `source` into `target_items`. Both collections end
/// dense. Returns the landing index, or `None` if `id` is not in `source`.
pub fn move_between<T: Positioned>(
    source: &mut Vec<T>,
    target_items: &mut Vec<T>,
    id: Uuid,
    target: i64,
) -> Option<usize> {
    let (_, item) = remove(source, id)?;
    Some(insert_ranked(target_items, item, target))
}

/// True when positions are exactly `0..len` in array order.
#[must_use]
pub fn is_dense<T: Positioned>(items: &[T]) -> bool {
    items
        .iter()
        .enumerate()
        .all(|(index, item)| item.position() == as_position(index))
}

#[cfg(test)]
#[path = "position_test.rs"]
mod tests;
