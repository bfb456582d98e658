//! Modbus TCP master connection controller
//!
//! [`TcpMaster`] owns one logical connection to one slave. `connect`,
//! `disconnect` and `dispose` are serialized behind a single connection gate;
//! state queries are lock-free snapshots. Disposal is claimed atomically and
//! fires the per-instance cancellation token, which aborts any connect attempt
//! in flight. The claim and the finished cleanup are tracked apart: a dispose
//! future dropped before it got the gate leaves the cleanup to the next
//! `dispose` call, or to `Drop`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::TcpMasterConfig;
use crate::error::{MasterError, Result};
use crate::link::Link;
use crate::retry::{RetryError, RetryExecutor};
use crate::session::{ModbusSessionFactory, ProtocolSession, SessionFactory};
use crate::state::{ConnectionState, StateCell};
use crate::transport::{TcpConnector, Timeouts, TransportConnector};

/// Snapshot taken from the configuration at initialization
#[derive(Debug)]
struct MasterSettings {
    endpoint: SocketAddr,
    unit_id: u8,
    timeouts: Timeouts,
    retry_delay_ms: u64,
    connect_retry: RetryExecutor,
    operation_retry: RetryExecutor,
}

/// One connect attempt: tear down leftovers, then build a fresh link
struct ConnectAttempt<'m, C, F>
where
    C: TransportConnector,
    F: SessionFactory<C::Stream>,
{
    link: &'m mut Link<C::Handle, F::Session>,
    connector: &'m C,
    factory: &'m F,
    settings: &'m MasterSettings,
    cancel: &'m CancellationToken,
}

impl<C, F> ConnectAttempt<'_, C, F>
where
    C: TransportConnector,
    F: SessionFactory<C::Stream>,
{
    async fn run(&mut self, attempt: u32) -> Result<()> {
        self.link.destroy().await;
        debug!(
            "Connect attempt {} to {} (unit {})",
            attempt, self.settings.endpoint, self.settings.unit_id
        );
        self.link
            .create(
                self.connector,
                self.factory,
                self.settings.endpoint,
                self.settings.unit_id,
                self.settings.timeouts,
                self.cancel,
            )
            .await
    }
}

/// Resilient Modbus TCP master
///
/// Generic over the transport connector and the session factory so tests can
/// substitute both; the defaults talk real Modbus TCP through `tokio-modbus`.
pub struct TcpMaster<C = TcpConnector, F = ModbusSessionFactory>
where
    C: TransportConnector,
    F: SessionFactory<C::Stream>,
{
    connector: C,
    factory: F,
    settings: OnceLock<MasterSettings>,
    /// Connection gate; the link is only touched while holding it
    gate: Mutex<Link<C::Handle, F::Session>>,
    state: StateCell,
    /// Set once by the first `dispose`; never cleared
    disposed: AtomicBool,
    /// Set under the gate when the dispose cleanup has finished
    cleaned: AtomicBool,
    cancel: CancellationToken,
}

impl TcpMaster {
    /// Create a master using TCP and `tokio-modbus`
    pub fn new() -> Self {
        Self::with_parts(TcpConnector, ModbusSessionFactory)
    }
}

impl Default for TcpMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, F> TcpMaster<C, F>
where
    C: TransportConnector,
    F: SessionFactory<C::Stream>,
{
    /// Create a master from an explicit connector and session factory
    pub fn with_parts(connector: C, factory: F) -> Self {
        Self {
            connector,
            factory,
            settings: OnceLock::new(),
            gate: Mutex::new(Link::new()),
            state: StateCell::default(),
            disposed: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// One-time setup; must be called before `connect`
    ///
    /// The endpoint, retry knobs and timeouts are range checked here and fail
    /// with `InvalidConfiguration`. `unit_id` is left to
    /// [`TcpMasterConfig::validate`].
    pub fn initialize(&self, config: &TcpMasterConfig) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.settings.get().is_some() {
            return Err(MasterError::AlreadyInitialized);
        }

        if let Err(e) = config.check_runtime() {
            error!("Rejected Modbus TCP master configuration: {}", e);
            return Err(e);
        }
        let endpoint = config.endpoint()?;
        let strategy = config.retry_strategy();
        let settings = MasterSettings {
            endpoint,
            unit_id: config.unit_id,
            timeouts: config.timeouts(),
            retry_delay_ms: config.retry_delay_ms,
            connect_retry: RetryExecutor::new("connect", strategy),
            operation_retry: RetryExecutor::new("operation", strategy),
        };
        let max_attempts = settings.connect_retry.strategy().max_attempts();
        self.settings
            .set(settings)
            .map_err(|_| MasterError::AlreadyInitialized)?;

        info!(
            "Modbus TCP master configured: {} unit={} retries={} delay={}ms send_timeout={}ms receive_timeout={}ms",
            endpoint,
            config.unit_id,
            max_attempts,
            config.retry_delay_ms,
            config.send_timeout_ms,
            config.receive_timeout_ms
        );
        Ok(())
    }

    /// Establish the connection
    ///
    /// No-op when already connected. Transient failures are retried; after
    /// exhaustion the error is `ConnectionFailed` carrying the last cause. A
    /// connect aborted by disposal returns `Ok` with the master disconnected.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        let settings = self.settings.get().ok_or(MasterError::NotInitialized)?;
        if self.is_connected() {
            trace!("Already connected to {}", settings.endpoint);
            return Ok(());
        }

        let mut link = self.gate.lock().await;
        // Dispose may have run while waiting for the gate
        self.ensure_not_disposed()?;

        match (self.state.load(), link.is_live()) {
            (ConnectionState::Connected, true) => {
                trace!("Connected by a concurrent caller: {}", settings.endpoint);
                return Ok(());
            },
            (ConnectionState::Connected, false) => {
                info!("Connection to {} lost, reconnecting", settings.endpoint);
            },
            (ConnectionState::Connecting, _) => {
                warn!("Previous connect to {} was abandoned, retrying", settings.endpoint);
            },
            (ConnectionState::Disconnected, _) if link.is_held() => {
                error!("Resources held while disconnected from {}", settings.endpoint);
                return Err(MasterError::invariant(
                    "transport resources held in DISCONNECTED state",
                ));
            },
            (ConnectionState::Disconnected, _) => {},
            (ConnectionState::Disposed, _) => return Err(MasterError::AlreadyDisposed),
        }

        self.state.store(ConnectionState::Connecting);
        info!(
            "Connecting to Modbus slave {} (unit {})",
            settings.endpoint, settings.unit_id
        );

        let mut attempt = ConnectAttempt {
            link: &mut *link,
            connector: &self.connector,
            factory: &self.factory,
            settings,
            cancel: &self.cancel,
        };
        let outcome = settings
            .connect_retry
            .execute(&self.cancel, &mut attempt, |ctx, n| Box::pin(ctx.run(n)))
            .await;

        match outcome {
            Ok(()) => {
                self.state.store(ConnectionState::Connected);
                info!("Connected to Modbus slave {}", settings.endpoint);
                Ok(())
            },
            Err(RetryError::Cancelled { attempts }) => {
                link.destroy().await;
                self.state.store(ConnectionState::Disconnected);
                trace!(
                    "Connect to {} cancelled after {} attempt(s)",
                    settings.endpoint,
                    attempts
                );
                Ok(())
            },
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(
                    "Connect to {} failed after {} attempt(s) with {}ms retry delay: {}",
                    settings.endpoint, attempts, settings.retry_delay_ms, last
                );
                link.destroy().await;
                self.state.store(ConnectionState::Disconnected);
                Err(MasterError::ConnectionFailed {
                    endpoint: settings.endpoint.to_string(),
                    attempts,
                    delay_ms: settings.retry_delay_ms,
                    source: Box::new(last),
                })
            },
            Err(RetryError::Fatal { attempts, error }) => {
                error!(
                    "Connect to {} aborted on attempt {}: {}",
                    settings.endpoint, attempts, error
                );
                link.destroy().await;
                self.state.store(ConnectionState::Disconnected);
                Err(error)
            },
        }
    }

    /// Tear down the connection
    ///
    /// Idempotent; release failures are logged and never returned.
    pub async fn disconnect(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state.load() == ConnectionState::Disconnected && !self.holds_resources() {
            trace!("Disconnect skipped, not connected");
            return Ok(());
        }

        let mut link = self.gate.lock().await;
        self.ensure_not_disposed()?;
        if self.state.load() == ConnectionState::Disconnected && !link.is_held() {
            return Ok(());
        }

        info!("Disconnecting from Modbus slave");
        link.destroy().await;
        self.state.store(ConnectionState::Disconnected);
        info!("Disconnected from Modbus slave");
        Ok(())
    }

    /// Whether the transport is open and live and the session exists
    ///
    /// Lock-free best-effort snapshot. While another caller holds the gate
    /// the recorded state is reported instead.
    pub fn is_connected(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        match self.gate.try_lock() {
            Ok(link) => link.is_live(),
            Err(_) => self.state.load().is_connected(),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Slave endpoint, once initialized
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.settings.get().map(|s| s.endpoint)
    }

    /// Release everything and enter the terminal `DISPOSED` state
    ///
    /// The cleanup body runs exactly once however many callers race here.
    /// Callers that lose the claim wait on the gate until the cleanup is done,
    /// and finish it themselves if the claiming call was dropped midway.
    pub async fn dispose(&self) {
        let claimed = self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            info!("Disposing Modbus TCP master");
            self.cancel.cancel();
        } else if self.cleaned.load(Ordering::Acquire) {
            trace!("Dispose already completed");
            return;
        } else {
            trace!("Dispose already claimed, waiting for cleanup");
        }

        let mut link = self.gate.lock().await;
        if self.cleaned.load(Ordering::Acquire) {
            trace!("Dispose cleanup done by another caller");
            return;
        }
        link.destroy().await;
        self.state.store(ConnectionState::Disposed);
        self.cleaned.store(true, Ordering::Release);
        drop(link);
        trace!("Connection gate released");

        info!("Connection resources cleaned up");
        info!("Modbus TCP master disposed");
    }

    /// Read holding registers through the operation retry policy
    pub async fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let settings = self.ready()?;
        let mut link = self.gate.lock().await;
        self.ensure_not_disposed()?;
        let session = link.session_mut().ok_or(MasterError::NotConnected)?;

        let outcome = settings
            .operation_retry
            .execute(&self.cancel, session, move |session, _| {
                Box::pin(async move { session.read_holding_registers(address, count).await })
            })
            .await;
        Self::operation_result("read_holding_registers", outcome)
    }

    /// Write a single holding register through the operation retry policy
    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<()> {
        let settings = self.ready()?;
        let mut link = self.gate.lock().await;
        self.ensure_not_disposed()?;
        let session = link.session_mut().ok_or(MasterError::NotConnected)?;

        let outcome = settings
            .operation_retry
            .execute(&self.cancel, session, move |session, _| {
                Box::pin(async move { session.write_single_register(address, value).await })
            })
            .await;
        Self::operation_result("write_single_register", outcome)
    }

    fn operation_result<T>(
        name: &str,
        outcome: std::result::Result<T, RetryError<MasterError>>,
    ) -> Result<T> {
        let stop = match outcome {
            Ok(value) => return Ok(value),
            Err(stop) => stop,
        };
        let attempts = stop.attempts();
        match stop {
            RetryError::Cancelled { .. } => {
                trace!("{} cancelled after {} attempt(s)", name, attempts);
                Err(MasterError::AlreadyDisposed)
            },
            RetryError::Exhausted { last, .. } => {
                warn!("{} failed after {} attempt(s): {}", name, attempts, last);
                Err(last)
            },
            RetryError::Fatal { error, .. } => {
                debug!("{} aborted on attempt {}: {}", name, attempts, error);
                Err(error)
            },
        }
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(MasterError::AlreadyDisposed)
        } else {
            Ok(())
        }
    }

    fn ready(&self) -> Result<&MasterSettings> {
        self.ensure_not_disposed()?;
        self.settings.get().ok_or(MasterError::NotInitialized)
    }

    /// A busy gate counts as holding resources
    fn holds_resources(&self) -> bool {
        match self.gate.try_lock() {
            Ok(link) => link.is_held(),
            Err(_) => true,
        }
    }
}

impl<C, F> Drop for TcpMaster<C, F>
where
    C: TransportConnector,
    F: SessionFactory<C::Stream>,
{
    fn drop(&mut self) {
        if *self.cleaned.get_mut() {
            return;
        }
        let claimed = self.disposed.swap(true, Ordering::AcqRel);
        self.cancel.cancel();
        self.gate.get_mut().release_now();
        self.state.store(ConnectionState::Disposed);
        if claimed {
            debug!("Modbus TCP master dropped during an unfinished dispose, resources released");
        } else {
            debug!("Modbus TCP master dropped without dispose, resources released");
        }
    }
}
