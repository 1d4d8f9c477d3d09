//! Process signal handling.
//!
//! SIGINT and SIGTERM resolve the shutdown future. SIGHUP posts a reload
//! request, which the run loop picks up between cycles.

use pawguard_core::{ReloadReason, ReloadSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Spawn the shutdown listener. The receiver resolves on SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be registered.
pub fn shutdown_signal() -> std::io::Result<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            let _ = tx.send(());
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl+C handler failed");
                return;
            }
            info!("Received Ctrl+C, shutting down");
            let _ = tx.send(());
        });
    }

    Ok(rx)
}

/// Forward SIGHUP to `sender` as a reload request.
///
/// # Errors
///
/// Returns an error if the handler cannot be registered.
#[cfg(unix)]
pub fn forward_hangup(sender: ReloadSender) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            if sender.request(ReloadReason::Signal) {
                info!("Received SIGHUP, reload requested");
            } else {
                debug!("Received SIGHUP, reload already pending");
            }
        }
        warn!("SIGHUP stream closed");
    });

    Ok(())
}

/// SIGHUP does not exist here; reloads come from file changes only.
#[cfg(not(unix))]
pub fn forward_hangup(_sender: ReloadSender) -> std::io::Result<()> {
    Ok(())
}
