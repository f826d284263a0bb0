//! The sync loop.
//!
//! # Responsibilities
//! - Run one reconciliation pass per queue batch, never two at once
//! - Own the applied state and the retry schedule
//! - Fall back to a full reload when a dynamic update fails
//!
//! # Data Flow
//! ```text
//! SyncQueue ─> Translating ─> Diffing ─> Applying ─> Idle
//!                   │             │           │
//!                   └─────────────┴───────────┴──> Error ─(backoff)─> Idle
//! ```
//!
//! # Design Decisions
//! - Retry timing is an explicit field, not ambient state; the queue is told
//!   when the next retry is due
//! - A failed pass leaves `AppliedState` untouched, so the next diff is
//!   computed against what the proxy actually runs

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::apply::{
    ApplyError, ConfigApplier, DynamicUpdater, ProxyControl, ProxyProcess, RenderedConfig,
    Renderer,
};
use crate::certificates::CertificateManager;
use crate::config::ControllerConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::Backoff;
use crate::store::Store;
use crate::sync::detector::{Change, ChangeDetector, ReloadReason};
use crate::sync::queue::SyncQueue;
use crate::sync::state::AppliedState;
use crate::translate::{translate, Defect, TranslateOptions, Translation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Translating,
    Diffing,
    Applying,
    Error,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// What a successful pass did to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Dynamic { backends: usize, certificates: usize },
    Reloaded(ReloadReason),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NoOp => "noop",
            Outcome::Dynamic { .. } => "dynamic",
            Outcome::Reloaded(_) => "reload",
        }
    }
}

/// Consecutive failures and the instant the next retry is due.
#[derive(Debug, Clone)]
pub struct RetryState {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl RetryState {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            backoff: Backoff::new(base_ms, max_ms),
            retry_at: None,
        }
    }

    fn failed(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    fn succeeded(&mut self) {
        self.backoff.reset();
        self.retry_at = None;
    }

    pub fn failures(&self) -> u32 {
        self.backoff.failures()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }
}

pub struct Reconciler {
    store: Store,
    options: watch::Receiver<TranslateOptions>,
    certificates: CertificateManager,
    renderer: Renderer,
    detector: ChangeDetector,
    dynamic: DynamicUpdater,
    applier: ConfigApplier,
    applied: Option<AppliedState>,
    retry: RetryState,
    phase: Phase,
    reported: BTreeSet<Defect>,
}

impl Reconciler {
    pub fn new(
        store: Store,
        options: watch::Receiver<TranslateOptions>,
        config: &ControllerConfig,
        control: Arc<dyn ProxyControl>,
        process: Arc<dyn ProxyProcess>,
    ) -> Self {
        let hot_swap = config.proxy.hot_certificate_swap && control.supports_certificate_swap();
        let warning_secs = i64::from(config.certificates.expiry_warning_days) * 86_400;

        Self {
            store,
            options,
            certificates: CertificateManager::new(warning_secs),
            renderer: Renderer::new(config.proxy.ssl_dir.clone()),
            detector: ChangeDetector::new(hot_swap),
            dynamic: DynamicUpdater::new(control),
            applier: ConfigApplier::from_config(&config.proxy, process),
            applied: None,
            retry: RetryState::new(config.sync.backoff_base_ms, config.sync.backoff_max_ms),
            phase: Phase::Idle,
            reported: BTreeSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn applied(&self) -> Option<&AppliedState> {
        self.applied.as_ref()
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    /// Defects reported by the most recent translation.
    pub fn defects(&self) -> impl Iterator<Item = &Defect> {
        self.reported.iter()
    }

    /// Drain the queue until shutdown or until every handle is dropped.
    ///
    /// The first pass waits for the store's initial list so a partial
    /// cache is never applied.
    pub async fn run(mut self, mut queue: SyncQueue, shutdown: &Shutdown) {
        let mut shutdown_rx = shutdown.subscribe();

        tokio::select! {
            _ = self.store.wait_until_synced() => {}
            _ = shutdown_rx.recv() => return,
        }
        tracing::info!("Reconciler started");

        loop {
            let batch = tokio::select! {
                batch = queue.next_batch(self.retry.retry_at()) => batch,
                _ = shutdown_rx.recv() => break,
            };
            let Some(batch) = batch else { break };

            tracing::debug!(
                keys = batch.keys.len(),
                coalesced = batch.coalesced,
                resyncs = ?batch.resyncs,
                "Reconciling"
            );
            // Not raced against shutdown: an apply is never abandoned mid-write.
            let _ = self.reconcile_once().await;
        }

        tracing::info!("Reconciler stopped");
    }

    /// Run one full pass and update the retry schedule.
    pub async fn reconcile_once(&mut self) -> Result<Outcome, ReconcileError> {
        match self.pass().await {
            Ok(outcome) => {
                self.retry.succeeded();
                self.phase = Phase::Idle;
                metrics::record_reconcile(outcome.as_str());
                match &outcome {
                    Outcome::NoOp => tracing::debug!("Proxy configuration already current"),
                    Outcome::Dynamic {
                        backends,
                        certificates,
                    } => tracing::info!(backends, certificates, "Applied dynamic update"),
                    Outcome::Reloaded(reason) => {
                        tracing::info!(reason = %reason, "Applied full reload")
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.phase = Phase::Error;
                let delay = self.retry.failed();
                metrics::record_reconcile("error");
                tracing::error!(
                    error = %e,
                    failures = self.retry.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconciliation failed"
                );
                self.phase = Phase::Idle;
                Err(e)
            }
        }
    }

    async fn pass(&mut self) -> Result<Outcome, ReconcileError> {
        self.phase = Phase::Translating;
        let now = unix_now();
        let snapshot = self.store.snapshot();
        let options = self.options.borrow().clone();

        let Translation { model, defects } = translate(&snapshot, &options, &self.certificates, now);
        self.report_defects(defects);
        self.certificates.observe(&model, now);
        self.certificates.prune(&snapshot);

        self.phase = Phase::Diffing;
        let rendered = self.renderer.render(&model);
        let change = self
            .detector
            .diff(self.applied.as_ref(), &model, &rendered.fingerprint);

        self.phase = Phase::Applying;
        let outcome = match change {
            Change::NoOp => return Ok(Outcome::NoOp),
            Change::DynamicUpdate(changes) => match self.dynamic.push(&changes).await {
                Ok(()) => Outcome::Dynamic {
                    backends: changes.backends.len(),
                    certificates: changes.certificates.len(),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Dynamic update failed, falling back to full reload");
                    self.full_reload(&rendered, ReloadReason::DynamicUpdateFailed)
                        .await?
                }
            },
            Change::FullReload(reason) => self.full_reload(&rendered, reason).await?,
        };

        self.applied = Some(AppliedState::new(Arc::new(model), rendered.fingerprint));
        Ok(outcome)
    }

    async fn full_reload(
        &mut self,
        rendered: &RenderedConfig,
        reason: ReloadReason,
    ) -> Result<Outcome, ReconcileError> {
        tracing::info!(reason = %reason, fingerprint = %rendered.fingerprint, "Full reload required");
        self.applier.apply(rendered).await?;
        Ok(Outcome::Reloaded(reason))
    }

    /// Count every defect, but only log the ones not seen on the last pass.
    fn report_defects(&mut self, defects: Vec<Defect>) {
        let current: BTreeSet<Defect> = defects.into_iter().collect();
        for defect in &current {
            metrics::record_defect(defect.kind);
            if !self.reported.contains(defect) {
                tracing::warn!(defect = %defect, "Translation defect");
            }
        }
        for resolved in self.reported.difference(&current) {
            tracing::info!(defect = %resolved, "Translation defect resolved");
        }
        self.reported = current;
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
