//! Connection registry: which live connections watch which board.
//!
//! DESIGN
//! ======
//! Two maps under one `RwLock`:
//! - `boards`: board id → subscribers (connection id → outbound sender)
//! - `subscriptions`: connection id → board id (reverse index)
//!
//! A connection appears in at most one board's set. A board entry exists
//! only while it has at least one subscriber. Every operation takes the lock
//! once and never awaits I/O while holding it, so mutations from concurrent
//! connection tasks are linearizable.
//!
//! Outbound senders carry pre-serialized text (`Arc<str>`), so a broadcast
//! encodes an event once and hands the same buffer to every subscriber.

use std::collections::HashMap;
use std::sync::Arc;

use frames::ErrorCode;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Outbound half of a connection's queue.
pub type Outbound = mpsc::Sender<Arc<str>>;

// =============================================================================
// CONNECTION
// =============================================================================

/// What the registry needs to know about one live websocket.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: Uuid,
    /// Bound by a successful `auth`; `None` until then.
    pub user_id: Option<Uuid>,
    pub tx: Outbound,
}

impl Connection {
    #[must_use]
    pub fn new(tx: Outbound) -> Self {
        Self { id: Uuid::new_v4(), user_id: None, tx }
    }
}

#[derive(Clone, Debug)]
struct Subscriber {
    user_id: Uuid,
    tx: Outbound,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Not authenticated")]
    Unauthenticated,
}

impl ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_NOT_AUTHENTICATED",
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
struct Inner {
    boards: HashMap<Uuid, HashMap<Uuid, Subscriber>>,
    subscriptions: HashMap<Uuid, Uuid>,
}

impl Inner {
    fn detach(&mut self, connection_id: Uuid) -> Option<Uuid> {
        let board_id = self.subscriptions.remove(&connection_id)?;
        if let Some(subscribers) = self.boards.get_mut(&board_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                self.boards.remove(&board_id);
            }
        }
        Some(board_id)
    }
}

/// Process-local map of board subscriptions.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `board_id`, leaving any prior board first.
    ///
    /// Returns the board the connection left, if any. Subscribing again to
    /// the same board leaves membership unchanged.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Unauthenticated`] when the connection has no identity;
    /// the registry is not touched.
    pub async fn subscribe(&self, connection: &Connection, board_id: Uuid) -> Result<Option<Uuid>, RegistryError> {
        let user_id = connection.user_id.ok_or(RegistryError::Unauthenticated)?;

        let mut inner = self.inner.write().await;
        let previous = inner.detach(connection.id);
        inner
            .boards
            .entry(board_id)
            .or_default()
            .insert(connection.id, Subscriber { user_id, tx: connection.tx.clone() });
        inner.subscriptions.insert(connection.id, board_id);
        Ok(previous)
    }

    /// Drop the connection's subscription. Idempotent.
    pub async fn unsubscribe(&self, connection_id: Uuid) -> Option<Uuid> {
        self.inner.write().await.detach(connection_id)
    }

    /// Cleanup hook for a closed connection; same effect as [`Self::unsubscribe`].
    pub async fn on_close(&self, connection_id: Uuid) -> Option<Uuid> {
        self.unsubscribe(connection_id).await
    }

    pub async fn board_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.inner.read().await.subscriptions.get(&connection_id).copied()
    }

    pub async fn subscriber_count(&self, board_id: Uuid) -> usize {
        self.inner.read().await.boards.get(&board_id).map_or(0, HashMap::len)
    }

    /// Number of boards with at least one subscriber.
    pub async fn board_count(&self) -> usize {
        self.inner.read().await.boards.len()
    }

    /// Snapshot of `(connection_id, user_id, sender)` for a board's
    /// subscribers. The lock is released before the caller sends anything.
    pub async fn live_subscribers(&self, board_id: Uuid) -> Vec<(Uuid, Uuid, Outbound)> {
        let inner = self.inner.read().await;
        inner.boards.get(&board_id).map_or_else(Vec::new, |subscribers| {
            subscribers
                .iter()
                .map(|(id, sub)| (*id, sub.user_id, sub.tx.clone()))
                .collect()
        })
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
