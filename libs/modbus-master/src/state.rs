//! Connection State
//!
//! State owned by the connection controller. Mutated only while holding the
//! connection gate, readable lock-free from anywhere.

use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of a master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport or session held
    #[default]
    Disconnected = 0,
    /// Connect sequence in progress
    Connecting = 1,
    /// Transport open and protocol session built
    Connected = 2,
    /// Terminal; no transition leaves it
    Disposed = 3,
}

impl ConnectionState {
    /// Check if state represents an active connection
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if state is the absorbing disposed state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disposed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disposed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disposed => write!(f, "DISPOSED"),
        }
    }
}

/// Atomic cell holding a [`ConnectionState`]
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state. `Disposed` is absorbing: once stored it is never replaced.
    pub(crate) fn store(&self, state: ConnectionState) -> ConnectionState {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == ConnectionState::Disposed as u8 {
                    None
                } else {
                    Some(state as u8)
                }
            })
            .unwrap_or_else(|current| current);
        ConnectionState::from_u8(previous)
    }
}
