//! Connection state and its transition table.
//!
//! `Connection` is the singleton owned by the stream session. Every state
//! change goes through `transition`, which rejects edges not listed in
//! `ConnectionState::can_transition`.

use std::fmt;

use serde::Serialize;

/// Lifecycle of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Channel open in flight.
    Connecting,
    /// Channel open, credential sent, not yet accepted.
    ConnectedUnauthenticated,
    /// Credential accepted; subscriptions allowed.
    Authenticated,
    /// Local close in progress.
    Closing,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal edge.
    pub const fn can_transition(self, next: Self) -> bool {
        use ConnectionState::{
            Authenticated, Closing, ConnectedUnauthenticated, Connecting, Disconnected,
        };
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, ConnectedUnauthenticated)
                | (ConnectedUnauthenticated, Authenticated)
                | (Connecting | ConnectedUnauthenticated | Authenticated, Disconnected)
                | (Connecting | ConnectedUnauthenticated | Authenticated, Closing)
                | (Closing, Disconnected)
        )
    }

    /// Whether a channel exists (heartbeat should run).
    pub const fn is_open(self) -> bool {
        matches!(self, Self::ConnectedUnauthenticated | Self::Authenticated)
    }

    /// Numeric code for the connection-state gauge.
    pub const fn code(self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::ConnectedUnauthenticated => 2,
            Self::Authenticated => 3,
            Self::Closing => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::ConnectedUnauthenticated => "CONNECTED_UNAUTHENTICATED",
            Self::Authenticated => "AUTHENTICATED",
            Self::Closing => "CLOSING",
        };
        f.write_str(s)
    }
}

/// Attempted an edge missing from the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal connection transition {from} -> {to}")]
pub struct IllegalTransition {
    /// State before.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}

/// The client's single connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    state: ConnectionState,
    reconnect_attempts: u32,
    last_identity: Option<String>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A fresh, disconnected connection.
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_identity: None,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Automatic reconnect attempts made since the last explicit reset.
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Identity reported by the last `authentication_success`.
    pub fn last_identity(&self) -> Option<&str> {
        self.last_identity.as_deref()
    }

    /// Move to `next`, rejecting edges outside the table.
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, IllegalTransition> {
        if !self.state.can_transition(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        let prev = self.state;
        self.state = next;
        Ok(prev)
    }

    /// Count one automatic reconnect attempt.
    pub const fn record_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    /// Explicit reset, only reachable through `reconnect()`.
    pub const fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Record the authenticated identity.
    pub fn set_identity(&mut self, identity: Option<String>) {
        self.last_identity = identity;
    }
}
