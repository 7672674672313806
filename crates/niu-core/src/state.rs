//! Connection lifecycle state machine for the persistent channel.
//!
//! ```text
//!            connect()          handshake
//!   Idle ───────────────▶ Connecting ─────────▶ Open
//!                          ▲      │               │
//!              backoff     │      │ failure       │ error / close / timeout
//!              elapsed     │      ▼               ▼
//!                        Reconnecting ◀───────────┘
//!                              │ retries exhausted
//!                              ▼
//!   Closing ─────────────────▶ Dead
//! ```
//!
//! `close()` moves any live state through `Closing` to `Dead`. `Dead` is terminal.

/// Channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected and exchanging frames.
    Open,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Shutting down on request.
    Closing,
    /// Terminal.
    Dead,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Reconnecting)
                | (Open, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Dead)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Reconnecting, Closing)
                | (Idle, Closing)
                | (Closing, Dead)
        )
    }

    /// Whether the state is terminal.
    pub fn is_dead(self) -> bool {
        self == ConnectionState::Dead
    }
}

/// Tracks the current [`ConnectionState`] and rejects illegal moves.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Start in `Idle`.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` and leaves the state unchanged when the move
    /// is not allowed.
    pub fn transition(&mut self, to: ConnectionState) -> crate::Result<ConnectionState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(crate::Error::InvalidTransition { from, to });
        }
        self.state = to;
        tracing::trace!(?from, ?to, "connection state changed");
        Ok(from)
    }
}
