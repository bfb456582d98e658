//! Protocol session
//!
//! The session performs Modbus request/response framing over an open stream.
//! Framing itself belongs to `tokio-modbus`; this module only adapts it to the
//! narrow capability the master consumes.

use std::fmt::{self, Debug};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use crate::error::{MasterError, Result};
use crate::transport::Timeouts;

/// Register capability consumed from the protocol library
#[async_trait]
pub trait ProtocolSession: Send + 'static {
    /// Read `count` holding registers starting at `address`
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write one holding register
    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()>;

    /// Release the session
    async fn close(&mut self) -> Result<()>;
}

/// Builds a protocol session over an open stream
pub trait SessionFactory<S>: Send + Sync + 'static {
    type Session: ProtocolSession;

    /// Create a session talking to `unit_id` over `stream`
    fn open_session(&self, stream: S, unit_id: u8, timeouts: Timeouts) -> Result<Self::Session>;
}

/// Session factory backed by `tokio-modbus`
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusSessionFactory;

impl<S> SessionFactory<S> for ModbusSessionFactory
where
    S: AsyncRead + AsyncWrite + Send + Unpin + Debug + 'static,
{
    type Session = ModbusSession;

    fn open_session(&self, stream: S, unit_id: u8, timeouts: Timeouts) -> Result<ModbusSession> {
        let ctx = tcp::attach_slave(stream, Slave(unit_id));
        Ok(ModbusSession {
            ctx,
            unit_id,
            timeouts,
        })
    }
}

/// Modbus TCP client session
pub struct ModbusSession {
    ctx: Context,
    unit_id: u8,
    timeouts: Timeouts,
}

impl Debug for ModbusSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusSession")
            .field("unit_id", &self.unit_id)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Bound a session request by `limit`
async fn bounded<T, F>(limit: Duration, what: &str, request: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(limit, request).await {
        Ok(result) => result.map_err(MasterError::from),
        Err(_) => Err(MasterError::timeout(format!(
            "{} timed out after {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl ProtocolSession for ModbusSession {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        bounded(
            self.timeouts.receive,
            "read_holding_registers",
            self.ctx.read_holding_registers(address, count),
        )
        .await
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        bounded(
            self.timeouts.send,
            "write_single_register",
            self.ctx.write_single_register(address, value),
        )
        .await
    }

    async fn close(&mut self) -> Result<()> {
        bounded(self.timeouts.send, "disconnect", self.ctx.disconnect()).await
    }
}
