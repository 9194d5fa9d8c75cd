//! Connection state machine
//!
//! `ConnectionState` is the single source of truth for link health. It is
//! mutated only by the ConnectionManager, through [`ConnectionState::on`].
//! Transport callbacks never set it directly: they are translated into
//! [`LinkSignal`]s and the manager applies them.
//!
//! ```text
//!                  attempt
//!   Disconnected ───────────> Connecting
//!        ▲                        │  authenticated
//!        │ failure / timeout      ▼
//!        └─────────────────── Connected
//!        ▲                        │  transport dropped
//!        │ teardown               ▼
//!        └─────────────────── Reconnecting ──authenticated──> Connected
//! ```
//!
//! Retry activity is tracked separately in [`Recovery`], which replaces the
//! "initial phase" and "reconnect in flight" guard flags with one enum: the
//! two can never be true at once.

use serde::Serialize;
use std::fmt;

/// Link state as seen by the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session (initial state)
    #[default]
    Disconnected,

    /// A fresh session is being established
    Connecting,

    /// Handshake done and the backend acknowledged authentication
    Connected,

    /// A live session dropped; recovery is under way
    Reconnecting,
}

/// Events the manager feeds into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    /// A connect attempt is starting
    AttemptStarted,
    /// Transport-level handshake completed (not sufficient for Connected)
    Handshake,
    /// Backend acknowledged authentication
    Authenticated,
    /// The attempt failed, timed out or authentication was rejected
    AttemptFailed,
    /// The transport reported the session dropped
    Dropped,
    /// Intentional teardown (disconnect / dispose)
    TornDown,
}

impl ConnectionState {
    /// The single authoritative transition function
    pub fn on(self, signal: LinkSignal) -> ConnectionState {
        use ConnectionState::*;
        use LinkSignal::*;

        match (self, signal) {
            (_, TornDown) => Disconnected,

            (Disconnected, AttemptStarted) => Connecting,
            (state, AttemptStarted) => state,

            (Connecting | Reconnecting, Authenticated) => Connected,
            (state, Authenticated) => state,

            (state, Handshake) => state,

            (Connecting, AttemptFailed) => Disconnected,
            (state, AttemptFailed) => state,

            (Connected, Dropped) => Reconnecting,
            (Connecting, Dropped) => Disconnected,
            (state, Dropped) => state,
        }
    }

    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What retry machinery is currently active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Nothing scheduled, nothing running
    #[default]
    Idle,

    /// The bounded start-up loop is iterating
    InitialPhase,

    /// A steady-state reconnection cycle is in flight (timer pending or
    /// attempt running)
    Cycle,
}

impl Recovery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recovery::Idle => "idle",
            Recovery::InitialPhase => "initial_phase",
            Recovery::Cycle => "cycle",
        }
    }
}
