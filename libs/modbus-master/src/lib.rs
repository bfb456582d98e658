//! Modbus TCP Master Library
//!
//! Resilient connection controller for a single Modbus TCP slave.
//!
//! # Architecture
//!
//! - **Configuration**: `TcpMasterConfig`, snapshotted once at initialization
//! - **Retry**: `RetryExecutor` with a fixed-delay bounded strategy, one
//!   instance for connect and one for register operations
//! - **Transport**: `TransportConnector` / `TransportHandle`, TCP by default
//! - **Session**: `SessionFactory` / `ProtocolSession`, backed by `tokio-modbus`
//! - **Controller**: `TcpMaster`, serializing connect, disconnect and dispose
//!   behind one connection gate

pub mod config;
pub mod error;
pub mod master;
pub mod retry;
pub mod session;
pub mod state;
pub mod transport;

mod link;

#[cfg(test)]
mod mock;

// Re-export core types
pub use config::TcpMasterConfig;
pub use error::{Classify, FailureKind, MasterError, Result};
pub use master::TcpMaster;
pub use retry::{RetryError, RetryExecutor, RetryStrategy};
pub use session::{ModbusSession, ModbusSessionFactory, ProtocolSession, SessionFactory};
pub use state::ConnectionState;
pub use transport::{TcpConnector, TcpHandle, Timeouts, TransportConnector, TransportHandle};
