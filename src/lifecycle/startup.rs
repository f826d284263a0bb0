//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect to the cluster and fail fast when it is unreachable
//! - Wire store, sync queue, reconciler and proxy collaborators
//! - Apply hot configuration changes to the translation options
//! - Stop every task in order on shutdown
//!
//! # Design Decisions
//! - Cluster connectivity is the only fatal runtime dependency
//! - Tasks get a bounded drain period before the process exits

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::apply::{CommandProcess, ControlError, HttpControlChannel};
use crate::config::{validate_config, ConfigWatcher, ControllerConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::store::{ingest, spawn_watchers, Store};
use crate::sync::{self, Reconciler, SyncHandle};
use crate::translate::TranslateOptions;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cluster connection failed: {0}")]
    Cluster(#[from] kube::Error),

    #[error("proxy control channel: {0}")]
    Control(#[from] ControlError),

    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Run the controller until a shutdown signal arrives.
///
/// `config_path` enables hot reload of the ingress section.
pub async fn run(config: ControllerConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    let client = kube::Client::try_default().await?;
    let version = client.apiserver_version().await?;
    tracing::info!(
        version = %version.git_version,
        platform = %version.platform,
        "Connected to cluster"
    );

    let control = Arc::new(HttpControlChannel::from_config(&config.proxy)?);
    let process = Arc::new(CommandProcess::from_config(&config.proxy));

    let shutdown = Shutdown::new();
    let (store, writer) = Store::new();
    let (sync_handle, queue) = sync::channel(&config.sync);
    let (options_tx, options_rx) = watch::channel(TranslateOptions::from_config(&config.ingress));

    let (watch_tx, watch_rx) = mpsc::channel(config.sync.queue_capacity.max(1));
    let mut tasks = spawn_watchers(
        client,
        config.ingress.namespace.as_deref(),
        watch_tx,
        &shutdown,
    );

    tasks.push({
        let handle = sync_handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            ingest(writer, watch_rx, |event| handle.notify(event), &shutdown).await;
        })
    });

    let reconciler = Reconciler::new(store, options_rx, &config, control, process);
    tasks.push({
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(queue, &shutdown).await })
    });

    // Dropping the guard stops the file watcher and ends the update task.
    let config_guard = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            let guard = watcher.run()?;
            tasks.push(tokio::spawn(apply_config_updates(
                config.clone(),
                updates,
                options_tx,
                sync_handle.clone(),
            )));
            Some(guard)
        }
        None => None,
    };

    let _signals = spawn_signal_handler(shutdown.clone(), sync_handle.clone())?;

    sync_handle.resync("startup");
    tracing::info!(class = %config.ingress.class, "Controller started");

    let mut stop = shutdown.subscribe();
    let _ = stop.recv().await;

    tracing::info!(tasks = tasks.len(), "Draining tasks");
    drop(config_guard);
    drop(sync_handle);
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Drain timed out");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Publish validated ingress settings; other sections need a restart.
async fn apply_config_updates(
    mut current: ControllerConfig,
    mut updates: mpsc::UnboundedReceiver<ControllerConfig>,
    options: watch::Sender<TranslateOptions>,
    sync: SyncHandle,
) {
    while let Some(next) = updates.recv().await {
        if let Err(errors) = validate_config(&next) {
            for error in &errors {
                tracing::error!(error = %error, "Invalid configuration, keeping current");
            }
            continue;
        }

        if next.sync != current.sync
            || next.proxy != current.proxy
            || next.certificates != current.certificates
            || next.observability != current.observability
            || next.ingress.namespace != current.ingress.namespace
        {
            tracing::warn!("Configuration changes outside the ingress section take effect after restart");
        }

        let translated = TranslateOptions::from_config(&next.ingress);
        let changed = options.send_if_modified(|opts| {
            if *opts == translated {
                return false;
            }
            *opts = translated;
            true
        });
        if changed {
            tracing::info!("Ingress configuration updated");
            sync.resync("configuration");
        }
        current = next;
    }
}
