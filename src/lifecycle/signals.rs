//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM and SIGINT trigger graceful shutdown
//! - SIGHUP forces a full resynchronization pass
//!
//! # Design Decisions
//! - A second SIGTERM/SIGINT after shutdown began exits immediately

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;
use crate::sync::SyncHandle;

#[cfg(unix)]
pub fn spawn_signal_handler(shutdown: Shutdown, sync: SyncHandle) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        let mut stopping = false;
        loop {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
                _ = hup.recv() => {
                    tracing::info!("SIGHUP received, forcing resync");
                    sync.resync("signal");
                    continue;
                }
            };

            if stopping {
                tracing::warn!(signal = name, "Second shutdown signal, exiting immediately");
                std::process::exit(1);
            }
            tracing::info!(signal = name, "Shutdown signal received");
            stopping = true;
            shutdown.trigger();
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_handler(shutdown: Shutdown, _sync: SyncHandle) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
    }))
}
