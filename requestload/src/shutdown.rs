//! Signal handling for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Installs SIGTERM + SIGINT handlers that cancel the given token.
pub fn install_signal_handler(stop: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Received SIGINT, stopping load"),
                    Err(e) => warn!("Failed to listen for SIGINT: {}", e),
                },
                _ = sigterm.recv() => info!("Received SIGTERM, stopping load"),
            }
            stop.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, stopping load"),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
            stop.cancel();
        });
    }

    Ok(())
}
