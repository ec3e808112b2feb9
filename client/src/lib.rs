//! # client
//!
//! Client side of realtime board sync. Holds a local copy of one board,
//! applies optimistic edits with rollback, reconciles inbound domain events,
//! and keeps a websocket subscription alive across reconnects.
//!
//! - [`position`]: dense integer ranks for cards and lists.
//! - [`pending`]: inverse operations for unconfirmed local edits.
//! - [`store`]: the board snapshot and every mutation path into it.
//! - [`connection`]: transport-free connection state machine and backoff.
//! - [`sync`]: the tokio task that drives the machine over a websocket.

pub mod connection;
pub mod pending;
pub mod position;
pub mod store;
pub mod sync;

pub use connection::{ConnectionState, ReconnectPolicy};
pub use pending::OpToken;
pub use store::{Applied, BoardStore, StoreError};
pub use sync::{Command, HttpSnapshotSource, SnapshotSource, SyncClient, SyncConfig, SyncError, SyncHandle};
