//! Sync client: keeps a [`BoardStore`] current over the realtime channel.
//!
//! DESIGN
//! ======
//! One background task owns the websocket and a [`ConnectionMachine`]. The
//! application talks to it through a [`SyncHandle`]: commands go in over an
//! mpsc channel, the store is shared behind a `RwLock`, and connection state
//! plus a store revision counter are published on `watch` channels.
//!
//! Snapshots come from a [`SnapshotSource`]. A fetch happens whenever the
//! machine asks for a resync and whenever an event leaves the store stale.
//! The fetch runs inline in the session loop, so frames that arrive during it
//! queue on the socket and apply on top of the fresh snapshot.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures end the session and go through the reconnect policy.
//! A failed snapshot fetch is logged and leaves the previous store in place;
//! the next stale event or reconnect retries it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use frames::{BoardSnapshot, ClientMessage, ControlReply, DomainEvent, ErrorCode, ServerMessage};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Action, ConnectionMachine, ConnectionState, ReconnectPolicy};
use crate::store::{Applied, BoardStore};

const COMMAND_QUEUE: usize = 32;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const ACCESS_DENIED_CODE: &str = "E_ACCESS_DENIED";
const MIN_PENDING_SWEEP_MS: u64 = 100;

/// How long a local edit may wait for its outcome before the view is
/// treated as unknown and refetched.
pub const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 30;

/// The store shared between the sync task and the application.
pub type SharedStore = Arc<RwLock<Option<BoardStore>>>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("message encode failed: {0}")]
    Encode(String),
    #[error("snapshot request failed: {0}")]
    SnapshotRequest(String),
    #[error("snapshot service error: status {status}")]
    SnapshotResponse { status: u16 },
    #[error("snapshot parse failed: {0}")]
    SnapshotParse(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
    #[error("sync task has stopped")]
    Stopped,
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) | Self::Send(_) => "E_WS_TRANSPORT",
            Self::Encode(_) => "E_ENCODE",
            Self::SnapshotRequest(_) | Self::SnapshotResponse { .. } => "E_SNAPSHOT_UNAVAILABLE",
            Self::SnapshotParse(_) => "E_SNAPSHOT_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Stopped => "E_SYNC_STOPPED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Send(_) | Self::SnapshotRequest(_) | Self::SnapshotResponse { status: 429 | 500..=599 }
        )
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Load the full current view of `board_id`.
    async fn fetch(&self, board_id: Uuid) -> Result<BoardSnapshot, SyncError>;
}

/// Reads snapshots from the CRUD API: `GET {api}/api/boards/{id}` returning
/// `{ "data": snapshot }`.
pub struct HttpSnapshotSource {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl HttpSnapshotSource {
    /// # Errors
    ///
    /// Returns [`SyncError::HttpClientBuild`] if the HTTP client cannot be
    /// constructed.
    pub fn new(api_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_url: api_url.trim_end_matches('/').to_owned(), token: token.into() })
    }

    fn board_url(&self, board_id: Uuid) -> String {
        format!("{}/api/boards/{board_id}", self.api_url)
    }
}

#[derive(serde::Deserialize)]
struct SnapshotEnvelope {
    data: BoardSnapshot,
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, board_id: Uuid) -> Result<BoardSnapshot, SyncError> {
        let response = self
            .http
            .get(self.board_url(board_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::SnapshotRequest(e.to_string()))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(SyncError::SnapshotResponse { status });
        }
        let text = response.text().await.map_err(|e| SyncError::SnapshotRequest(e.to_string()))?;
        let envelope: SnapshotEnvelope =
            serde_json::from_str(&text).map_err(|e| SyncError::SnapshotParse(e.to_string()))?;
        Ok(envelope.data)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// View a board. Replaces any previous subscription.
    Subscribe(Uuid),
    /// Leave the current board.
    Unsubscribe,
    /// Refetch the current board's snapshot.
    Resync,
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Websocket endpoint, e.g. `ws://host/api/ws`.
    pub ws_url: String,
    /// Bearer token sent in the `auth` message.
    pub token: String,
    pub policy: ReconnectPolicy,
    /// Unconfirmed local edits older than this trigger a resync.
    pub pending_timeout: Duration,
}

impl SyncConfig {
    #[must_use]
    pub fn new(ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            token: token.into(),
            policy: ReconnectPolicy::default(),
            pending_timeout: Duration::from_secs(DEFAULT_PENDING_TIMEOUT_SECS),
        }
    }
}

pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    store: SharedStore,
    state: watch::Receiver<ConnectionState>,
    revision: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if the sync task has exited.
    pub async fn subscribe(&self, board_id: Uuid) -> Result<(), SyncError> {
        self.send(Command::Subscribe(board_id)).await
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if the sync task has exited.
    pub async fn unsubscribe(&self) -> Result<(), SyncError> {
        self.send(Command::Unsubscribe).await
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if the sync task has exited.
    pub async fn resync(&self) -> Result<(), SyncError> {
        self.send(Command::Resync).await
    }

    async fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands.send(command).await.map_err(|_| SyncError::Stopped)
    }

    #[must_use]
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that changes on every connection state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receiver whose value increments whenever the store changes.
    #[must_use]
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync: task ended abnormally");
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// What handling one server message produced.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Dispatch {
    pub actions: Vec<Action>,
    pub store_changed: bool,
}

/// Route one server message into the machine and the store.
pub(crate) fn dispatch(machine: &mut ConnectionMachine, store: &mut Option<BoardStore>, message: ServerMessage) -> Dispatch {
    match message {
        ServerMessage::Reply(ControlReply::AuthSuccess { user_id }) => {
            debug!(%user_id, "sync: authenticated");
            Dispatch { actions: machine.on_auth_success(), store_changed: false }
        }
        ServerMessage::Reply(ControlReply::AuthError { error }) => {
            warn!(%error, "sync: authentication rejected");
            Dispatch { actions: machine.on_auth_error(), store_changed: false }
        }
        ServerMessage::Reply(ControlReply::Subscribed { board_id }) => {
            debug!(%board_id, "sync: subscribed");
            Dispatch { actions: machine.on_subscribed(board_id), store_changed: false }
        }
        ServerMessage::Error(reply) => {
            warn!(error = %reply.error, code = ?reply.code, "sync: server error reply");
            if reply.code.as_deref() == Some(ACCESS_DENIED_CODE) {
                machine.on_subscribe_denied();
            }
            Dispatch::default()
        }
        ServerMessage::Event(event) => {
            let Some(store) = store.as_mut() else {
                return Dispatch::default();
            };
            match store.apply_event(&event) {
                Applied::Changed => Dispatch { actions: Vec::new(), store_changed: true },
                Applied::Unchanged | Applied::OtherBoard => Dispatch::default(),
                Applied::UnknownTarget => Dispatch { actions: vec![Action::Resync(store.board_id())], store_changed: true },
            }
        }
    }
}

/// Handle a frame that matched no message shape. A known event kind for the
/// loaded board means an update was lost, so the store can no longer be
/// trusted.
pub(crate) fn dispatch_undecodable(store: &mut Option<BoardStore>, text: &str) -> Dispatch {
    let Some((kind, board_id)) = DomainEvent::peek_header(text) else {
        return Dispatch::default();
    };
    let Some(store) = store.as_mut().filter(|s| s.board_id() == board_id) else {
        return Dispatch::default();
    };
    warn!(%board_id, %kind, "sync: undecodable event; marking stale");
    store.mark_stale();
    Dispatch { actions: vec![Action::Resync(board_id)], store_changed: true }
}

/// Local edits that never heard back leave the view unknown: refetch.
pub(crate) fn expire_pending(store: &mut Option<BoardStore>, max_age: Duration) -> Dispatch {
    let Some(store) = store.as_mut() else {
        return Dispatch::default();
    };
    let expired = store.pending().older_than(max_age);
    if expired.is_empty() {
        return Dispatch::default();
    }
    warn!(board_id = %store.board_id(), count = expired.len(), "sync: pending operations unanswered; marking stale");
    store.mark_stale();
    Dispatch { actions: vec![Action::Resync(store.board_id())], store_changed: true }
}

// =============================================================================
// DRIVER
// =============================================================================

enum SessionEnd {
    Closed,
    Shutdown,
}

pub struct SyncClient {
    config: SyncConfig,
    snapshots: Arc<dyn SnapshotSource>,
    machine: ConnectionMachine,
    commands: mpsc::Receiver<Command>,
    store: SharedStore,
    state_tx: watch::Sender<ConnectionState>,
    revision_tx: watch::Sender<u64>,
}

impl SyncClient {
    /// Start the sync task. It connects immediately and subscribes once a
    /// board is requested through the handle.
    #[must_use]
    pub fn spawn(config: SyncConfig, snapshots: Arc<dyn SnapshotSource>) -> SyncHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (revision_tx, revision) = watch::channel(0);
        let store: SharedStore = Arc::new(RwLock::new(None));

        let client = Self {
            machine: ConnectionMachine::new(config.policy.clone()),
            config,
            snapshots,
            commands,
            store: store.clone(),
            state_tx,
            revision_tx,
        };
        let task = tokio::spawn(client.run());

        SyncHandle { commands: command_tx, store, state, revision, task }
    }

    async fn run(mut self) {
        while !self.machine.is_stopped() {
            self.machine.connect();
            self.publish_state();

            let end = match tokio_tungstenite::connect_async(self.config.ws_url.as_str()).await {
                Ok((stream, _)) => self.session(stream).await,
                Err(e) => {
                    warn!(url = %self.config.ws_url, error = %e, "sync: connect failed");
                    SessionEnd::Closed
                }
            };
            if matches!(end, SessionEnd::Shutdown) {
                break;
            }

            let actions = self.machine.on_closed();
            self.publish_state();
            for action in actions {
                match action {
                    Action::Reconnect { attempt, delay } => {
                        info!(attempt, delay_ms = delay.as_millis(), "sync: reconnecting");
                        if matches!(self.backoff(delay).await, SessionEnd::Shutdown) {
                            self.machine.stop();
                        }
                    }
                    Action::GiveUp => warn!("sync: giving up on connection"),
                    _ => {}
                }
            }
        }
        self.machine.stop();
        self.publish_state();
        debug!("sync: task stopped");
    }

    /// Wait out a reconnect delay while still accepting commands.
    async fn backoff(&mut self, delay: Duration) -> SessionEnd {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return SessionEnd::Closed,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return SessionEnd::Shutdown,
                    Some(Command::Subscribe(board_id)) => {
                        self.machine.set_board(Some(board_id));
                    }
                    Some(Command::Unsubscribe) => {
                        self.machine.set_board(None);
                        self.clear_store().await;
                    }
                    // Reconnecting always resyncs.
                    Some(Command::Resync) => {}
                },
            }
        }
    }

    async fn session<S>(&mut self, stream: S) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut sink, mut source) = stream.split();

        let actions = self.machine.on_open();
        self.publish_state();
        if let Err(e) = self.perform(&mut sink, actions).await {
            warn!(error = %e, "sync: handshake failed");
            return SessionEnd::Closed;
        }

        let sweep_every = self.config.pending_timeout.max(Duration::from_millis(MIN_PENDING_SWEEP_MS));
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                _ = sweep.tick() => self.sweep_pending(&mut sink).await,
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_text(&mut sink, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("sync: server closed connection");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => {
                        warn!(error = %e, "sync: receive failed");
                        return SessionEnd::Closed;
                    }
                },
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(command) => self.on_command(&mut sink, command).await,
                },
            };
            self.publish_state();

            if let Err(e) = result {
                warn!(error = %e, "sync: session failed");
                return SessionEnd::Closed;
            }
            if self.machine.is_stopped() {
                return SessionEnd::Closed;
            }
        }
    }

    async fn on_text<K>(&mut self, sink: &mut K, text: &str) -> Result<(), SyncError>
    where
        K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let outcome = match ServerMessage::parse(text) {
            Ok(message) => {
                let mut store = self.store.write().await;
                dispatch(&mut self.machine, &mut store, message)
            }
            Err(e) => {
                warn!(error = %e, "sync: unrecognized server frame");
                let mut store = self.store.write().await;
                dispatch_undecodable(&mut store, text)
            }
        };
        if outcome.store_changed {
            self.bump_revision();
        }
        self.perform(sink, outcome.actions).await
    }

    async fn sweep_pending<K>(&mut self, sink: &mut K) -> Result<(), SyncError>
    where
        K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let outcome = {
            let mut store = self.store.write().await;
            expire_pending(&mut store, self.config.pending_timeout)
        };
        if outcome.store_changed {
            self.bump_revision();
        }
        self.perform(sink, outcome.actions).await
    }

    async fn on_command<K>(&mut self, sink: &mut K, command: Command) -> Result<(), SyncError>
    where
        K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let actions = match command {
            Command::Subscribe(board_id) => self.machine.set_board(Some(board_id)),
            Command::Unsubscribe => {
                self.clear_store().await;
                self.machine.set_board(None)
            }
            Command::Resync => match self.machine.state() {
                ConnectionState::Subscribed { board_id } => vec![Action::Resync(board_id)],
                _ => Vec::new(),
            },
            Command::Shutdown => Vec::new(),
        };
        self.perform(sink, actions).await
    }

    async fn perform<K>(&mut self, sink: &mut K, actions: Vec<Action>) -> Result<(), SyncError>
    where
        K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        for action in actions {
            match action {
                Action::SendAuth => send(sink, &ClientMessage::Auth { token: self.config.token.clone() }).await?,
                Action::SendSubscribe(board_id) => send(sink, &ClientMessage::Subscribe { board_id }).await?,
                Action::SendUnsubscribe => send(sink, &ClientMessage::Unsubscribe).await?,
                Action::Resync(board_id) => self.resync(board_id).await,
                // Produced only by `on_closed`, which `run` handles.
                Action::Reconnect { .. } | Action::GiveUp => {}
            }
        }
        Ok(())
    }

    async fn resync(&mut self, board_id: Uuid) {
        let snapshot = match self.snapshots.fetch(board_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%board_id, error = %e, retryable = e.retryable(), "sync: snapshot fetch failed");
                return;
            }
        };
        if self.machine.desired_board() != Some(board_id) {
            debug!(%board_id, "sync: discarding snapshot for a board no longer viewed");
            return;
        }
        {
            let mut store = self.store.write().await;
            match store.as_mut() {
                Some(current) if current.board_id() == board_id => current.replace_snapshot(snapshot),
                _ => *store = Some(BoardStore::new(snapshot)),
            }
        }
        info!(%board_id, "sync: snapshot loaded");
        self.bump_revision();
    }

    async fn clear_store(&mut self) {
        let cleared = self.store.write().await.take().is_some();
        if cleared {
            self.bump_revision();
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn bump_revision(&self) {
        self.revision_tx.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

async fn send<K>(sink: &mut K, message: &ClientMessage) -> Result<(), SyncError>
where
    K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = message.to_text().map_err(|e| SyncError::Encode(e.to_string()))?;
    sink.send(Message::Text(text.into())).await.map_err(|e| SyncError::Send(e.to_string()))
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
