//! Graceful shutdown utilities
//!
//! Ctrl+C on every platform, SIGTERM in addition on Unix.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
                    _ = term.recv() => info!("SIGTERM received"),
                }
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable, Ctrl+C only: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Ctrl+C received");
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received");
    }
}

/// Token cancelled when a shutdown signal arrives
///
/// Must be called inside a tokio runtime; the signal listener runs as a
/// background task.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_shutdown() => trigger.cancel(),
            // Someone else already cancelled; stop listening
            _ = trigger.cancelled() => {},
        }
    });
    token
}
