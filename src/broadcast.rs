//! Broadcast dispatcher: fan one domain event out to a board's subscribers.
//!
//! Delivery is best-effort and at-most-once. The event is encoded once, then
//! offered to each subscriber's outbound queue with `try_send`; a closed or
//! full queue counts as skipped and the loop moves on. Nothing is queued for
//! later, retried, or acknowledged.

use std::sync::Arc;

use frames::DomainEvent;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use crate::registry::ConnectionRegistry;

/// Outcome counts for one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Deliver `event` to every live subscriber of `board_id`.
///
/// An absent board yields an empty report.
///
/// # Errors
///
/// Returns the encoding error if the event cannot be serialized; no
/// subscriber is contacted in that case.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    board_id: Uuid,
    event: &DomainEvent,
) -> Result<BroadcastReport, serde_json::Error> {
    let subscribers = registry.live_subscribers(board_id).await;
    if subscribers.is_empty() {
        return Ok(BroadcastReport::default());
    }

    let text: Arc<str> = serde_json::to_string(event)?.into();
    let mut report = BroadcastReport::default();

    for (connection_id, user_id, tx) in subscribers {
        match tx.try_send(text.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                debug!(%board_id, %connection_id, %user_id, kind = %event.kind(), "broadcast: outbound queue full, skipped");
                report.skipped += 1;
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%board_id, %connection_id, %user_id, kind = %event.kind(), "broadcast: connection closed, skipped");
                report.skipped += 1;
            }
        }
    }

    debug!(%board_id, kind = %event.kind(), delivered = report.delivered, skipped = report.skipped, "broadcast: done");
    Ok(report)
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
