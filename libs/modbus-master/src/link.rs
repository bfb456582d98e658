//! Transport resource holder
//!
//! Owns exactly one transport handle and one protocol session built over it,
//! or neither. Creation is all-or-nothing; teardown is idempotent and never
//! fails observably.

use std::net::SocketAddr;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{MasterError, Result};
use crate::session::{ProtocolSession, SessionFactory};
use crate::transport::{Timeouts, TransportConnector, TransportHandle};

/// Transport handle plus the protocol session over it
pub(crate) struct Link<H, S> {
    transport: Option<H>,
    session: Option<S>,
    timeouts: Option<Timeouts>,
}

impl<H, S> Link<H, S>
where
    H: TransportHandle,
    S: ProtocolSession,
{
    pub(crate) fn new() -> Self {
        Self {
            transport: None,
            session: None,
            timeouts: None,
        }
    }

    /// Whether any resource is held
    pub(crate) fn is_held(&self) -> bool {
        self.transport.is_some() || self.session.is_some()
    }

    /// Transport exists and is live, and the session exists
    pub(crate) fn is_live(&self) -> bool {
        self.session.is_some() && self.transport.as_ref().is_some_and(|t| t.is_live())
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// Open the transport and build the session over it
    ///
    /// On any failure, including cancellation, nothing is held afterwards.
    pub(crate) async fn create<C, F>(
        &mut self,
        connector: &C,
        factory: &F,
        endpoint: SocketAddr,
        unit_id: u8,
        timeouts: Timeouts,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        C: TransportConnector<Handle = H>,
        F: SessionFactory<C::Stream, Session = S>,
    {
        if self.is_held() {
            return Err(MasterError::invariant(
                "transport resources already held when creating a new link",
            ));
        }

        let (mut handle, stream) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MasterError::Cancelled),
            opened = connector.open(endpoint, timeouts) => opened?,
        };

        match factory.open_session(stream, unit_id, timeouts) {
            Ok(session) => {
                debug!("Modbus session created for unit {}", unit_id);
                self.transport = Some(handle);
                self.session = Some(session);
                self.timeouts = Some(timeouts);
                Ok(())
            },
            Err(e) => {
                if let Err(close_err) = handle.close() {
                    warn!("Failed to close transport after session error: {}", close_err);
                }
                Err(e)
            },
        }
    }

    /// Release session then transport; each is released even if the other fails
    pub(crate) async fn destroy(&mut self) {
        if !self.is_held() {
            return;
        }

        info!("Cleaning up connection resources");
        let timeouts = self.timeouts.take();

        if let Some(mut session) = self.session.take() {
            let closed = match timeouts {
                Some(t) => match timeout(t.send, session.close()).await {
                    Ok(result) => result,
                    Err(_) => Err(MasterError::timeout("session close")),
                },
                None => session.close().await,
            };
            if let Err(e) = closed {
                warn!("Error while releasing Modbus session: {}", e);
            }
            trace!("Modbus session released");
        }

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Error while closing transport: {}", e);
            }
            trace!("Transport released");
        }
    }

    /// Synchronous release for drop paths; the session is dropped unclosed
    pub(crate) fn release_now(&mut self) {
        self.timeouts = None;
        if self.session.take().is_some() {
            trace!("Modbus session dropped");
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Error while closing transport: {}", e);
            }
            trace!("Transport released");
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockHandle, MockSession, MockSessionFactory, Script};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:502".parse().unwrap()
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            send: Duration::from_millis(100),
            receive: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let script = Script::default();
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        link.create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await
            .unwrap();
        assert!(link.is_held());
        assert!(link.is_live());
        assert_eq!(script.live_handles(), 1);

        link.destroy().await;
        assert!(!link.is_held());
        assert!(!link.is_live());
        assert_eq!(script.live_handles(), 0);
        assert_eq!(script.sessions_closed.load(Ordering::SeqCst), 1);

        // Idempotent
        link.destroy().await;
        assert_eq!(script.transports_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_while_held_is_invariant_violation() {
        let script = Script::default();
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        link.create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await
            .unwrap();
        let result = link
            .create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await;

        assert!(matches!(result, Err(MasterError::InvariantViolation(_))));
        assert_eq!(script.opens.load(Ordering::SeqCst), 1);
        assert!(link.is_live());
        assert_eq!(script.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_session_failure_leaves_nothing_held() {
        let script = Script {
            fail_session: true,
            ..Default::default()
        };
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        let result = link
            .create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await;

        assert!(matches!(result, Err(MasterError::Protocol(_))));
        assert!(!link.is_held());
        assert_eq!(script.opens.load(Ordering::SeqCst), 1);
        assert_eq!(script.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_open() {
        let script = Script {
            hang_open: true,
            ..Default::default()
        };
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = link
            .create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await;

        assert!(matches!(result, Err(MasterError::Cancelled)));
        assert!(!link.is_held());
        assert_eq!(script.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_failing_session_close_still_closes_transport() {
        let script = Script {
            fail_session_close: true,
            ..Default::default()
        };
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        link.create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await
            .unwrap();
        link.destroy().await;

        assert!(!link.is_held());
        assert_eq!(script.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_release_now() {
        let script = Script::default();
        let connector = MockConnector::new(script.clone());
        let factory = MockSessionFactory::new(script.clone());
        let cancel = CancellationToken::new();
        let mut link: Link<MockHandle, MockSession> = Link::new();

        link.create(&connector, &factory, endpoint(), 1, timeouts(), &cancel)
            .await
            .unwrap();
        link.release_now();

        assert!(!link.is_held());
        assert_eq!(script.live_handles(), 0);
    }
}
