//! Connection state machine and reconnect policy.
//!
//! DESIGN
//! ======
//! The machine is transport-free: the sync driver feeds it what happened
//! (socket opened, reply received, socket closed) and executes the
//! [`Action`]s it returns. That keeps retry and resync decisions testable
//! without a network.
//!
//! ```text
//! Disconnected ─connect─▶ Connecting ─opened─▶ Authenticating
//!      ▲                                            │ auth_success
//!      │ closed (retry or give up)                  ▼
//!      └──────────────────────────────────── Authenticated ─subscribed─▶ Subscribed{board}
//! ```
//!
//! Events missed while disconnected are gone for good, so reaching
//! `Subscribed` for a board whose view may be behind (first subscribe, a
//! board switch, or any reconnect) yields [`Action::Resync`]. The snapshot is
//! fetched after the subscription is live, so nothing falls in between.

use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket handshake in progress.
    Connecting,
    /// Socket open, `auth` sent.
    Authenticating,
    Authenticated,
    Subscribed { board_id: Uuid },
}

/// Side effects the driver must perform.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    SendAuth,
    SendSubscribe(Uuid),
    SendUnsubscribe,
    /// Refetch the board snapshot and replace the store.
    Resync(Uuid),
    /// Wait, then reconnect.
    Reconnect { attempt: u32, delay: Duration },
    /// Stop; retrying cannot help.
    GiveUp,
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

/// Exponential backoff with optional jitter.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Fraction of each delay (0.0 to 1.0) that may be shaved off at random.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_millis(1000), max: Duration::from_millis(10_000), factor: 2, max_attempts: None, jitter: 0.0 }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(multiplier).min(self.max)
    }

    /// Delay before retry `attempt`, with jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        let shave = rand::rng().random_range(0.0..=jitter);
        base.mul_f64(1.0 - shave)
    }

    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

// =============================================================================
// MACHINE
// =============================================================================

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Board the user is looking at, if any.
    desired: Option<Uuid>,
    /// Consecutive failed connection attempts.
    attempts: u32,
    needs_resync: bool,
    stopped: bool,
}

impl ConnectionMachine {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { state: ConnectionState::Disconnected, policy, desired: None, attempts: 0, needs_resync: true, stopped: false }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn desired_board(&self) -> Option<Uuid> {
        self.desired
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Begin a connection attempt.
    pub fn connect(&mut self) {
        if !self.stopped {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn on_open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Authenticating;
        vec![Action::SendAuth]
    }

    pub fn on_auth_success(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Authenticating {
            return Vec::new();
        }
        self.state = ConnectionState::Authenticated;
        self.attempts = 0;
        self.desired.map(Action::SendSubscribe).into_iter().collect()
    }

    /// A rejected token will be rejected again; stop.
    pub fn on_auth_error(&mut self) -> Vec<Action> {
        self.state = ConnectionState::Disconnected;
        self.stopped = true;
        vec![Action::GiveUp]
    }

    pub fn on_subscribed(&mut self, board_id: Uuid) -> Vec<Action> {
        if !matches!(self.state, ConnectionState::Authenticated | ConnectionState::Subscribed { .. }) {
            return Vec::new();
        }
        if self.desired != Some(board_id) {
            // Confirmation for a board the user already left.
            return if self.desired.is_none() { vec![Action::SendUnsubscribe] } else { Vec::new() };
        }
        self.state = ConnectionState::Subscribed { board_id };
        if std::mem::take(&mut self.needs_resync) { vec![Action::Resync(board_id)] } else { Vec::new() }
    }

    /// Access to the desired board was refused. The server keeps any
    /// subscription the connection already held, so the view falls back to
    /// that board; otherwise it stays connected and unsubscribed.
    pub fn on_subscribe_denied(&mut self) {
        self.desired = match self.state {
            ConnectionState::Subscribed { board_id } => Some(board_id),
            _ => None,
        };
    }

    /// Point the connection at a board (or none).
    pub fn set_board(&mut self, board_id: Option<Uuid>) -> Vec<Action> {
        if self.desired == board_id {
            return Vec::new();
        }
        self.desired = board_id;
        self.needs_resync = true;
        match (self.state, board_id) {
            (ConnectionState::Authenticated | ConnectionState::Subscribed { .. }, Some(board_id)) => {
                vec![Action::SendSubscribe(board_id)]
            }
            (ConnectionState::Subscribed { .. }, None) => {
                self.state = ConnectionState::Authenticated;
                vec![Action::SendUnsubscribe]
            }
            _ => Vec::new(),
        }
    }

    /// The socket closed or could not open.
    pub fn on_closed(&mut self) -> Vec<Action> {
        self.state = ConnectionState::Disconnected;
        self.needs_resync = true;
        if self.stopped {
            return Vec::new();
        }
        self.attempts = self.attempts.saturating_add(1);
        if self.policy.allows(self.attempts) {
            vec![Action::Reconnect { attempt: self.attempts, delay: self.policy.delay(self.attempts) }]
        } else {
            self.stopped = true;
            vec![Action::GiveUp]
        }
    }

    /// Local shutdown: no further reconnects.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
