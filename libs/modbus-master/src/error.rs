//! Modbus Master Error Types
//!
//! Error taxonomy for the connection controller and the failure
//! classification consulted by the retry executor.

use std::io;

use thiserror::Error;

/// Result type for modbus-master operations
pub type Result<T> = std::result::Result<T, MasterError>;

/// Failure category inspected by the retry executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt (refused, reset, timed out, interrupted)
    Transient,
    /// Abort immediately without consuming remaining attempts
    Fatal,
}

/// Classification of an attempt failure
///
/// The retry executor never matches on concrete error variants; it only asks
/// the error which category it belongs to, so any transport can plug in its
/// own fault vocabulary.
pub trait Classify {
    /// Category of this failure
    fn failure_kind(&self) -> FailureKind;

    /// Whether this failure is the cancellation signal surfacing from an attempt
    fn is_cancellation(&self) -> bool {
        false
    }
}

/// Modbus master errors
#[derive(Debug, Error)]
pub enum MasterError {
    /// Malformed address or out-of-range parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `connect` or an operation called before `initialize`
    #[error("Master not initialized")]
    NotInitialized,

    /// `initialize` called twice
    #[error("Master already initialized")]
    AlreadyInitialized,

    /// Transport level I/O failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Transport or request timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connect retries exhausted
    #[error(
        "Connection to {endpoint} failed after {attempts} attempt(s) with {delay_ms}ms retry delay: {source}"
    )]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        delay_ms: u64,
        #[source]
        source: Box<MasterError>,
    },

    /// Cancellation observed inside an attempt, never surfaced by `connect`
    #[error("Operation cancelled")]
    Cancelled,

    /// Any call after `dispose`
    #[error("Master already disposed")]
    AlreadyDisposed,

    /// Register operation without a live session
    #[error("Not connected")]
    NotConnected,

    /// Impossible state combination observed under the connection gate
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Protocol session failure
    #[error("Protocol error: {0}")]
    Protocol(String),
}

// Helper methods for creating errors
impl MasterError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        MasterError::InvalidConfiguration(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        MasterError::Timeout(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        MasterError::InvariantViolation(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        MasterError::Protocol(msg.into())
    }

    /// Underlying cause of a `ConnectionFailed`, or the error itself
    pub fn last_cause(&self) -> &MasterError {
        match self {
            MasterError::ConnectionFailed { source, .. } => source.last_cause(),
            other => other,
        }
    }
}

/// I/O error kinds treated as transient transport faults
fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WouldBlock
    )
}

impl Classify for MasterError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            MasterError::Io(e) if is_transient_io(e.kind()) => FailureKind::Transient,
            MasterError::Timeout(_) => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, MasterError::Cancelled)
    }
}
