//! Coalescing work queue between the store and the reconciler.
//!
//! # Data Flow
//! ```text
//! StoreEvent ──> SyncHandle::notify ──┐
//! SIGHUP     ──> SyncHandle::resync ──┼─> mpsc ──> SyncQueue::next_batch ──> SyncBatch
//! config     ──> SyncHandle::resync ──┘
//! ```
//!
//! # Design Decisions
//! - Requests carry no payload the reconciler depends on; every pass reads
//!   the latest snapshot, so a dropped request loses nothing as long as one
//!   is still pending
//! - The batch deadline is fixed when the first request arrives, so a
//!   steady stream of events cannot postpone a pass forever

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::store::{ObjectKey, ResourceKind, StoreEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Object(StoreEvent),
    Resync { reason: &'static str },
}

/// Requests absorbed into one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatch {
    pub keys: BTreeSet<(ResourceKind, ObjectKey)>,
    pub resyncs: BTreeSet<&'static str>,
    /// Number of requests absorbed.
    pub coalesced: usize,
}

impl SyncBatch {
    fn absorb(&mut self, request: SyncRequest) {
        self.coalesced += 1;
        match request {
            SyncRequest::Object(event) => {
                self.keys.insert((event.kind, event.key));
            }
            SyncRequest::Resync { reason } => {
                self.resyncs.insert(reason);
            }
        }
    }
}

/// Cloneable sender side of the queue.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncRequest>,
}

impl SyncHandle {
    pub fn notify(&self, event: StoreEvent) {
        self.send(SyncRequest::Object(event));
    }

    pub fn resync(&self, reason: &'static str) {
        self.send(SyncRequest::Resync { reason });
    }

    fn send(&self, request: SyncRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                tracing::debug!(request = ?request, "Sync queue full, request coalesced");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Sync queue closed, dropping request");
            }
        }
    }
}

#[derive(Debug)]
pub struct SyncQueue {
    rx: mpsc::Receiver<SyncRequest>,
    debounce: Duration,
    min_interval: Duration,
    last_batch: Option<Instant>,
}

pub fn channel(config: &SyncConfig) -> (SyncHandle, SyncQueue) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    (
        SyncHandle { tx },
        SyncQueue {
            rx,
            debounce: Duration::from_millis(config.debounce_ms),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_batch: None,
        },
    )
}

impl SyncQueue {
    /// Wait for the next batch of work.
    ///
    /// With `retry_at` set, a batch is produced at that instant even when no
    /// request arrives. Returns `None` once every handle is dropped and the
    /// queue is drained.
    pub async fn next_batch(&mut self, retry_at: Option<Instant>) -> Option<SyncBatch> {
        let first = match retry_at {
            Some(at) => tokio::select! {
                item = self.rx.recv() => item?,
                _ = tokio::time::sleep_until(at) => SyncRequest::Resync { reason: "retry" },
            },
            None => self.rx.recv().await?,
        };

        let mut batch = SyncBatch::default();
        batch.absorb(first);

        let mut deadline = Instant::now() + self.debounce;
        if let Some(last) = self.last_batch {
            deadline = deadline.max(last + self.min_interval);
        }
        if let Some(at) = retry_at {
            deadline = deadline.max(at);
        }

        let mut open = true;
        while open {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                item = self.rx.recv() => match item {
                    Some(request) => batch.absorb(request),
                    None => open = false,
                },
            }
        }

        self.last_batch = Some(Instant::now());
        Some(batch)
    }
}
