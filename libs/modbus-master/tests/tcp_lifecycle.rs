//! Lifecycle tests against a loopback Modbus TCP slave
//!
//! The slave below answers function codes 0x03 (read holding registers, value
//! = register address) and 0x06 (write single register, echoed back).

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modbus_master::{ConnectionState, MasterError, TcpMaster, TcpMasterConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// ============================================================================
// Loopback slave
// ============================================================================

struct Slave {
    addr: SocketAddr,
    accepts: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

impl Slave {
    /// Bind and serve; `hang_up` closes every connection right after accept
    async fn start(hang_up: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicU32::new(0));

        let counter = accepts.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                if hang_up {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve(socket));
            }
        });

        Self {
            addr,
            accepts,
            task,
        }
    }

    fn accepts(&self) -> u32 {
        self.accepts.load(Ordering::SeqCst)
    }

    fn config(&self) -> TcpMasterConfig {
        TcpMasterConfig {
            number_of_retries: 3,
            retry_delay_ms: 5,
            ..TcpMasterConfig::new(self.addr.ip().to_string(), self.addr.port())
        }
    }
}

async fn serve(mut socket: TcpStream) {
    // MBAP header (7 bytes) + function code, address, quantity/value (5 bytes)
    let mut request = [0u8; 12];
    while socket.read_exact(&mut request).await.is_ok() {
        let response = match request[7] {
            0x03 => {
                let address = u16::from_be_bytes([request[8], request[9]]);
                let count = u16::from_be_bytes([request[10], request[11]]);
                let mut frame = Vec::with_capacity(9 + 2 * count as usize);
                frame.extend_from_slice(&request[0..4]);
                frame.extend_from_slice(&(3 + 2 * count).to_be_bytes());
                frame.push(request[6]);
                frame.push(0x03);
                frame.push((2 * count) as u8);
                for i in 0..count {
                    frame.extend_from_slice(&address.wrapping_add(i).to_be_bytes());
                }
                frame
            },
            0x06 => request.to_vec(),
            _ => return,
        };
        if socket.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn new_master(config: &TcpMasterConfig) -> TcpMaster {
    let master = TcpMaster::new();
    master.initialize(config).unwrap();
    master
}

// ============================================================================
// Connect / Disconnect
// ============================================================================

#[tokio::test]
async fn test_connect_twice_opens_one_connection() {
    let slave = Slave::start(false).await;
    let master = new_master(&slave.config());

    master.connect().await.unwrap();
    master.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(master.is_connected());
    assert_eq!(master.state(), ConnectionState::Connected);
    assert_eq!(slave.accepts(), 1);

    master.dispose().await;
}

#[tokio::test]
async fn test_reconnect_after_slave_goes_away() {
    let slave = Slave::start(false).await;
    let config = slave.config();
    let master = new_master(&config);

    master.connect().await.unwrap();
    assert!(master.is_connected());
    master.disconnect().await.unwrap();
    assert!(!master.is_connected());

    // Stop listening; the port now refuses connections
    slave.task.abort();
    let _ = slave.task.await;

    let err = master.connect().await.unwrap_err();
    match err {
        MasterError::ConnectionFailed {
            attempts, delay_ms, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(delay_ms, 5);
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!master.is_connected());
    assert_eq!(master.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_peer_close_is_detected_and_repaired() {
    let slave = Slave::start(true).await;
    let master = new_master(&slave.config());

    master.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!master.is_connected());

    master.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(slave.accepts(), 2);

    master.dispose().await;
    assert!(!master.is_connected());
}

// ============================================================================
// Register operations
// ============================================================================

#[tokio::test]
async fn test_read_and_write_registers() {
    let slave = Slave::start(false).await;
    let master = new_master(&slave.config());

    assert!(matches!(
        master.read_holding_registers(0, 1).await,
        Err(MasterError::NotConnected)
    ));

    master.connect().await.unwrap();
    let values = master.read_holding_registers(100, 4).await.unwrap();
    assert_eq!(values, vec![100, 101, 102, 103]);

    master.write_single_register(5, 0x1234).await.unwrap();

    master.disconnect().await.unwrap();
    assert!(matches!(
        master.write_single_register(5, 1).await,
        Err(MasterError::NotConnected)
    ));
}

// ============================================================================
// Dispose
// ============================================================================

#[tokio::test]
async fn test_concurrent_dispose_from_tasks() {
    let slave = Slave::start(false).await;
    let master = Arc::new(new_master(&slave.config()));
    master.connect().await.unwrap();

    let a = tokio::spawn({
        let master = master.clone();
        async move { master.dispose().await }
    });
    let b = tokio::spawn({
        let master = master.clone();
        async move { master.dispose().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(master.state(), ConnectionState::Disposed);
    assert!(!master.is_connected());
    assert!(matches!(master.connect().await, Err(MasterError::AlreadyDisposed)));
    assert!(matches!(master.disconnect().await, Err(MasterError::AlreadyDisposed)));
}
