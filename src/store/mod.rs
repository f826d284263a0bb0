//! Object Store
//!
//! # Responsibilities
//! - Cache the latest known version of every watched cluster object
//! - Hand out consistent immutable snapshots to the reconciler
//! - Report additions, updates and deletions after they become visible
//!
//! # Data Flow
//! ```text
//! kube watch ──> StoreWriter::apply ──publish──> ArcSwap<Snapshot>
//!                     │                               │
//!                     └──> StoreEvent ──> SyncHandle  └──> Store::snapshot()
//! ```

pub mod objects;
pub mod offline;
pub mod snapshot;
pub mod watch;
pub mod writer;

pub use objects::{EventType, ObjectKey, ResourceKind, StoreEvent, StoredResource};
pub use offline::{snapshot_from_json, LoadedObjects, OfflineError};
pub use snapshot::Snapshot;
pub use watch::{ingest, spawn_watchers, WatchEvent};
pub use writer::{Store, StoreWriter};
