//! Transport layer
//!
//! Opens the stream connection the protocol session is built on. The
//! connector hands back two halves of the same connection: a
//! [`TransportHandle`] kept by the master for liveness checks and closing, and
//! the stream consumed by the protocol session.

use std::fmt::Debug;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{MasterError, Result};

/// Per-call transport timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bounds connect and outgoing requests
    pub send: Duration,
    /// Bounds waiting for a response
    pub receive: Duration,
}

/// Live transport handle owned by the master
pub trait TransportHandle: Send + Sync + Debug + 'static {
    /// Whether the underlying connection is still usable
    fn is_live(&self) -> bool;

    /// Close the connection. Closing twice is not an error.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Handle kept for liveness checks and close
    type Handle: TransportHandle;
    /// Stream handed to the protocol session
    type Stream: Send + 'static;

    /// Open a connection to `endpoint`
    async fn open(
        &self,
        endpoint: SocketAddr,
        timeouts: Timeouts,
    ) -> Result<(Self::Handle, Self::Stream)>;
}

/// TCP connector based on `tokio::net::TcpStream`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    type Handle = TcpHandle;
    type Stream = TcpStream;

    async fn open(&self, endpoint: SocketAddr, timeouts: Timeouts) -> Result<(TcpHandle, TcpStream)> {
        debug!("TCP connecting: {}", endpoint);

        let stream = match timeout(timeouts.send, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("TCP err: {} - {}", endpoint, e);
                return Err(MasterError::Io(e));
            },
            Err(_) => {
                return Err(MasterError::timeout(format!(
                    "Connection to {} timed out after {}ms",
                    endpoint,
                    timeouts.send.as_millis()
                )));
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }

        // Split into a probe (same socket) and the stream given to the session
        let std_stream = stream.into_std()?;
        let probe = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        debug!("TCP connected: {}", endpoint);
        Ok((
            TcpHandle {
                probe: Some(probe),
                peer: endpoint,
            },
            stream,
        ))
    }
}

/// Handle on an open TCP connection
#[derive(Debug)]
pub struct TcpHandle {
    /// Non-blocking clone of the session socket
    probe: Option<std::net::TcpStream>,
    peer: SocketAddr,
}

impl TcpHandle {
    /// Remote endpoint of this connection
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl TransportHandle for TcpHandle {
    fn is_live(&self) -> bool {
        let Some(probe) = &self.probe else {
            return false;
        };

        // Socket is non-blocking: WouldBlock means open with nothing pending,
        // Ok(0) means the peer closed its side.
        let mut buf = [0u8; 1];
        match probe.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(_) => false,
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(probe) = self.probe.take() else {
            return Ok(());
        };

        match probe.shutdown(Shutdown::Both) {
            Ok(()) => {
                trace!("TCP shutdown: {}", self.peer);
                Ok(())
            },
            // Already closed by the session or the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }
}
