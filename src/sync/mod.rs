//! Synchronization Loop
//!
//! # Responsibilities
//! - Absorb bursts of store events into single reconciliation passes
//! - Classify each new model against what the proxy currently runs
//! - Dispatch to the dynamic updater or the config applier
//!
//! # Data Flow
//! ```text
//! StoreEvent ─> SyncQueue ─> Reconciler ─> translate ─> ChangeDetector
//!                                                            │
//!                                  DynamicUpdater <─┬────────┘
//!                                  ConfigApplier  <─┘
//! ```
//!
//! # Design Decisions
//! - Exactly one pass runs at a time; the reconciler owns all mutable state
//!   between passes

pub mod detector;
pub mod queue;
pub mod reconciler;
pub mod state;

pub use detector::{Change, ChangeDetector, DynamicChanges, ReloadReason};
pub use queue::{channel, SyncBatch, SyncHandle, SyncQueue, SyncRequest};
pub use reconciler::{Outcome, Phase, ReconcileError, Reconciler, RetryState};
pub use state::AppliedState;
