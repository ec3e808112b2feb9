//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the connection registry and the two external collaborators (identity
//! and board access) behind trait objects, so the websocket layer runs the
//! same way against live services and in-process test doubles.

use std::sync::Arc;

use frames::DomainEvent;
use uuid::Uuid;

use crate::broadcast::{self, BroadcastReport};
use crate::config::{DEFAULT_WS_OUTBOUND_QUEUE, ServerConfig};
use crate::registry::ConnectionRegistry;
use crate::services::access::BoardAccess;
use crate::services::identity::IdentityVerifier;

/// Shared application state. Clone is required by Axum; every field is
/// cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub access: Arc<dyn BoardAccess>,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// Shared secret for the event ingest route; `None` leaves it unmounted.
    pub ingest_key: Option<Arc<str>>,
}

impl AppState {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityVerifier>, access: Arc<dyn BoardAccess>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            identity,
            access,
            outbound_queue: DEFAULT_WS_OUTBOUND_QUEUE,
            ingest_key: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        self.outbound_queue = config.outbound_queue;
        self.ingest_key = config.ingest_key.as_deref().map(Arc::from);
        self
    }

    /// Fan `event` out to the subscribers of `board_id`.
    ///
    /// # Errors
    ///
    /// Returns the encoding error if the event cannot be serialized.
    pub async fn broadcast(&self, board_id: Uuid, event: &DomainEvent) -> Result<BroadcastReport, serde_json::Error> {
        broadcast::broadcast(&self.registry, board_id, event).await
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
