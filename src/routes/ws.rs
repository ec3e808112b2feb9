//! WebSocket handler: control messages in, board events out.
//!
//! DESIGN
//! ======
//! On upgrade each connection gets an id, a bounded outbound queue, and one
//! task running a `select!` loop:
//! - inbound client frames → parse + handle (`auth`, `subscribe`, `unsubscribe`)
//! - queued event text from broadcasts → forward to the socket
//!
//! Inbound handling is transport-free: [`process_inbound_text`] mutates the
//! connection and registry and returns the replies to send, so tests drive it
//! without a socket. Frames from one connection are handled in arrival order.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connection registered nowhere, unauthenticated
//! 2. `auth` → identity bound, or `auth_error` and close
//! 3. `subscribe` → access check, registry entry, `subscribed`
//! 4. Close or transport error → `registry.on_close` (always)

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{ClientMessage, ControlReply, ErrorCode, ProtocolError, ServerMessage, error_reply};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{Connection, RegistryError};
use crate::services::access::AccessError;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Board not found or access denied")]
    Denied,
    #[error(transparent)]
    AccessCheck(#[from] AccessError),
}

impl From<RegistryError> for SubscribeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unauthenticated => Self::Unauthenticated,
        }
    }
}

impl ErrorCode for SubscribeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_NOT_AUTHENTICATED",
            Self::Denied => "E_ACCESS_DENIED",
            Self::AccessCheck(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::AccessCheck(_))
    }
}

// =============================================================================
// INBOUND RESULT
// =============================================================================

/// What the transport should do after one inbound frame.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Inbound {
    pub replies: Vec<ServerMessage>,
    /// Close the socket after sending `replies`.
    pub close: bool,
}

impl Inbound {
    fn reply(message: impl Into<ServerMessage>) -> Self {
        Self { replies: vec![message.into()], close: false }
    }

    fn silent() -> Self {
        Self::default()
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.outbound_queue);
    let mut conn = Connection::new(tx);
    let connection_id = conn.id;

    info!(%connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let inbound = match msg {
                    Message::Text(text) => process_inbound_text(&state, &mut conn, text.as_str()).await,
                    Message::Binary(_) => {
                        let err = ProtocolError::InvalidJson("binary frames are not supported".into());
                        Inbound::reply(error_reply(&err))
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if send_replies(&mut socket, &inbound.replies).await.is_err() {
                    break;
                }
                if inbound.close {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            Some(text) = rx.recv() => {
                if socket.send(Message::Text(text.as_ref().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(board_id) = state.registry.on_close(connection_id).await {
        debug!(%connection_id, %board_id, "ws: subscription released on close");
    }
    info!(%connection_id, "ws: client disconnected");
}

async fn send_replies(socket: &mut WebSocket, replies: &[ServerMessage]) -> Result<(), axum::Error> {
    for reply in replies {
        match reply.to_text() {
            Ok(text) => socket.send(Message::Text(text.into())).await?,
            Err(e) => warn!(error = %e, "ws: reply encode failed"),
        }
    }
    Ok(())
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and handle one inbound text frame; return what to send back.
pub(crate) async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Inbound {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection_id = %conn.id, error = %e, code = e.error_code(), "ws: invalid inbound message");
            return Inbound::reply(error_reply(&e));
        }
    };

    match message {
        ClientMessage::Auth { token } => handle_auth(state, conn, &token).await,
        ClientMessage::Subscribe { board_id } => match handle_subscribe(state, conn, board_id).await {
            Ok(()) => Inbound::reply(ControlReply::Subscribed { board_id }),
            Err(e) => {
                warn!(connection_id = %conn.id, %board_id, error = %e, code = e.error_code(), "ws: subscribe rejected");
                Inbound::reply(error_reply(&e))
            }
        },
        ClientMessage::Unsubscribe => {
            if let Some(board_id) = state.registry.unsubscribe(conn.id).await {
                info!(connection_id = %conn.id, %board_id, "ws: unsubscribed");
            }
            Inbound::silent()
        }
    }
}

async fn handle_auth(state: &AppState, conn: &mut Connection, token: &str) -> Inbound {
    match state.identity.verify(token).await {
        Ok(user_id) => {
            if conn.user_id.is_some_and(|current| current != user_id) {
                // A subscription authorized for the old identity does not carry over.
                if let Some(board_id) = state.registry.unsubscribe(conn.id).await {
                    info!(connection_id = %conn.id, %board_id, "ws: identity changed, subscription dropped");
                }
            }
            conn.user_id = Some(user_id);
            info!(connection_id = %conn.id, %user_id, "ws: authenticated");
            Inbound::reply(ControlReply::AuthSuccess { user_id })
        }
        Err(e) => {
            warn!(connection_id = %conn.id, error = %e, code = e.error_code(), "ws: authentication failed");
            Inbound { replies: vec![ControlReply::AuthError { error: e.to_string() }.into()], close: true }
        }
    }
}

async fn handle_subscribe(state: &AppState, conn: &Connection, board_id: Uuid) -> Result<(), SubscribeError> {
    let user_id = conn.user_id.ok_or(SubscribeError::Unauthenticated)?;
    let role = state
        .access
        .member_role(user_id, board_id)
        .await?
        .ok_or(SubscribeError::Denied)?;

    let previous = state.registry.subscribe(conn, board_id).await?;
    info!(connection_id = %conn.id, %user_id, %board_id, ?role, ?previous, "ws: subscribed");
    Ok(())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
