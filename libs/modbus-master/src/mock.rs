//! Mock transport and session for controller tests
//!
//! All counters live behind `Arc`s so a test keeps its own clone of the
//! [`Script`] and can inspect what the master did with the connector.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{MasterError, Result};
use crate::session::{ProtocolSession, SessionFactory};
use crate::transport::{Timeouts, TransportConnector, TransportHandle};

/// Shared behaviour knobs and counters
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    /// Transport opens attempted
    pub opens: Arc<AtomicU32>,
    /// Handles successfully created
    pub handles: Arc<AtomicU32>,
    pub transports_closed: Arc<AtomicU32>,
    pub sessions_closed: Arc<AtomicU32>,
    /// Remaining opens that fail with a refused connection
    pub refusals_left: Arc<AtomicU32>,
    /// Every open is refused while set
    pub unreachable: Arc<AtomicBool>,
    /// Opens fail with a non-retryable error
    pub fatal_open: bool,
    /// Opens never complete
    pub hang_open: bool,
    pub fail_session: bool,
    pub fail_session_close: bool,
    /// Simulates the slave closing its side
    pub peer_closed: Arc<AtomicBool>,
    /// Remaining reads that time out
    pub read_failures_left: Arc<AtomicU32>,
    pub reads: Arc<AtomicU32>,
    pub writes: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl Script {
    /// Script whose first `n` opens are refused
    pub(crate) fn refusing(n: u32) -> Self {
        let script = Self::default();
        script.refusals_left.store(n, Ordering::SeqCst);
        script
    }

    /// Handles created and not yet closed
    pub(crate) fn live_handles(&self) -> u32 {
        self.handles.load(Ordering::SeqCst) - self.transports_closed.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    script: Script,
    closed: bool,
}

impl TransportHandle for MockHandle {
    fn is_live(&self) -> bool {
        !self.closed && !self.script.peer_closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.script.transports_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnector {
    script: Script,
}

impl MockConnector {
    pub(crate) fn new(script: Script) -> Self {
        Self { script }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    type Handle = MockHandle;
    type Stream = ();

    async fn open(&self, _endpoint: SocketAddr, _timeouts: Timeouts) -> Result<(MockHandle, ())> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);

        if self.script.hang_open {
            std::future::pending::<()>().await;
        }
        if self.script.fatal_open {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
        }
        if self.script.unreachable.load(Ordering::SeqCst)
            || Script::take_one(&self.script.refusals_left)
        {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }

        self.script.peer_closed.store(false, Ordering::SeqCst);
        self.script.handles.fetch_add(1, Ordering::SeqCst);
        Ok((
            MockHandle {
                script: self.script.clone(),
                closed: false,
            },
            (),
        ))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockSessionFactory {
    script: Script,
}

impl MockSessionFactory {
    pub(crate) fn new(script: Script) -> Self {
        Self { script }
    }
}

impl SessionFactory<()> for MockSessionFactory {
    type Session = MockSession;

    fn open_session(&self, _stream: (), _unit_id: u8, _timeouts: Timeouts) -> Result<MockSession> {
        if self.script.fail_session {
            return Err(MasterError::protocol("session rejected"));
        }
        Ok(MockSession {
            script: self.script.clone(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockSession {
    script: Script,
}

#[async_trait]
impl ProtocolSession for MockSession {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        if Script::take_one(&self.script.read_failures_left) {
            return Err(MasterError::timeout("read_holding_registers"));
        }
        Ok((address..address.saturating_add(count)).collect())
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        if let Ok(mut writes) = self.script.writes.lock() {
            writes.push((address, value));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.script.sessions_closed.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_session_close {
            return Err(MasterError::protocol("close failed"));
        }
        Ok(())
    }
}
