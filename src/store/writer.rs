//! The single writer of the object cache.
//!
//! # Responsibilities
//! - Apply watch events to the per-kind maps
//! - Drop updates older than the cached revision
//! - Buffer relists and diff them against the cache on completion
//! - Publish the new snapshot before reporting what changed
//! - Report when every kind has completed its initial list
//!
//! # Design Decisions
//! - Only the ingestion task owns a `StoreWriter`; readers go through `Store`
//! - Events are returned to the caller, so a notification can never precede
//!   the snapshot that contains it

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use tokio::sync::watch;

use crate::observability::metrics;
use crate::store::objects::{
    is_stale, EventType, ObjectKey, ResourceKind, StoreEvent, StoredResource,
};
use crate::store::snapshot::Snapshot;

/// Read handle to the object cache.
#[derive(Debug, Clone)]
pub struct Store {
    current: Arc<ArcSwap<Snapshot>>,
    synced: watch::Receiver<bool>,
}

impl Store {
    /// Create an empty store and its only writer.
    pub fn new() -> (Store, StoreWriter) {
        let current = Arc::new(ArcSwap::from_pointee(Snapshot::default()));
        let (synced_tx, synced) = watch::channel(false);
        let store = Store {
            current: current.clone(),
            synced,
        };
        let writer = StoreWriter {
            current,
            relists: RelistBuffers::default(),
            listed: BTreeSet::new(),
            synced: synced_tx,
        };
        (store, writer)
    }

    /// A store pre-populated with a snapshot and marked as synced.
    ///
    /// Used where no watch stream exists, such as offline rendering.
    pub fn from_snapshot(snapshot: Snapshot) -> Store {
        let (_tx, synced) = watch::channel(true);
        Store {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
            synced,
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// True once every kind has completed its first list.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until every kind has completed its first list.
    pub async fn wait_until_synced(&self) {
        let mut synced = self.synced.clone();
        // An error means the writer is gone and no sync will ever happen.
        let _ = synced.wait_for(|done| *done).await;
    }
}

/// Objects collected while a relist is in progress, one slot per kind.
#[derive(Debug, Default)]
pub struct RelistBuffers {
    pub(crate) ingresses: Option<BTreeMap<ObjectKey, Arc<Ingress>>>,
    pub(crate) services: Option<BTreeMap<ObjectKey, Arc<Service>>>,
    pub(crate) endpoint_slices: Option<BTreeMap<ObjectKey, Arc<EndpointSlice>>>,
    pub(crate) secrets: Option<BTreeMap<ObjectKey, Arc<Secret>>>,
    pub(crate) config_maps: Option<BTreeMap<ObjectKey, Arc<ConfigMap>>>,
}

#[derive(Debug)]
pub struct StoreWriter {
    current: Arc<ArcSwap<Snapshot>>,
    relists: RelistBuffers,
    listed: BTreeSet<ResourceKind>,
    synced: watch::Sender<bool>,
}

impl StoreWriter {
    /// Apply one watch event and return the resulting changes.
    pub fn apply<K: StoredResource>(&mut self, event: watcher::Event<K>) -> Vec<StoreEvent> {
        let events = match event {
            watcher::Event::Apply(object) => self.upsert(object).into_iter().collect(),
            watcher::Event::Delete(object) => self.remove(&object).into_iter().collect(),
            watcher::Event::Init => {
                tracing::debug!(kind = %K::KIND, "Relist started");
                *K::relist_buffer(&mut self.relists) = Some(BTreeMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                match K::relist_buffer(&mut self.relists) {
                    Some(buffer) => {
                        if let Some(key) = ObjectKey::from_resource(&object) {
                            buffer.insert(key, Arc::new(object));
                        }
                        Vec::new()
                    }
                    // A relist item without a preceding Init is treated as a plain update.
                    None => self.upsert(object).into_iter().collect(),
                }
            }
            watcher::Event::InitDone => {
                let events = match K::relist_buffer(&mut self.relists).take() {
                    Some(listed) => self.resync::<K>(listed),
                    None => Vec::new(),
                };
                self.mark_listed(K::KIND);
                events
            }
        };

        for event in &events {
            metrics::record_store_event(event.kind, event.event_type);
        }
        events
    }

    fn mark_listed(&mut self, kind: ResourceKind) {
        if !self.listed.insert(kind) || self.listed.len() < ResourceKind::ALL.len() {
            return;
        }
        tracing::info!("All resource kinds listed, store is synced");
        self.synced.send_replace(true);
    }

    fn upsert<K: StoredResource>(&mut self, object: K) -> Option<StoreEvent> {
        let Some(key) = ObjectKey::from_resource(&object) else {
            tracing::warn!(kind = %K::KIND, "Ignoring object without a name");
            return None;
        };

        let current = self.current.load();
        let event_type = match current.get::<K>(&key) {
            Some(existing) if is_stale(existing.as_ref(), &object) => {
                tracing::debug!(kind = %K::KIND, key = %key, "Dropping stale update");
                return None;
            }
            Some(existing) if existing.as_ref() == &object => return None,
            Some(_) => EventType::Updated,
            None => EventType::Added,
        };

        let mut next = Snapshot::clone(&current);
        Arc::make_mut(K::objects_mut(&mut next)).insert(key.clone(), Arc::new(object));
        self.current.store(Arc::new(next));

        Some(StoreEvent {
            kind: K::KIND,
            key,
            event_type,
        })
    }

    fn remove<K: StoredResource>(&mut self, object: &K) -> Option<StoreEvent> {
        let key = ObjectKey::from_resource(object)?;
        let current = self.current.load();
        current.get::<K>(&key)?;

        let mut next = Snapshot::clone(&current);
        Arc::make_mut(K::objects_mut(&mut next)).remove(&key);
        self.current.store(Arc::new(next));

        Some(StoreEvent {
            kind: K::KIND,
            key,
            event_type: EventType::Deleted,
        })
    }

    /// Replace a kind with a completed relist, reporting every difference.
    fn resync<K: StoredResource>(&mut self, listed: BTreeMap<ObjectKey, Arc<K>>) -> Vec<StoreEvent> {
        let current = self.current.load_full();
        let existing = K::objects(&current);
        let mut events = Vec::new();
        let mut merged = BTreeMap::new();

        for (key, object) in listed {
            match existing.get(&key) {
                None => {
                    events.push(StoreEvent {
                        kind: K::KIND,
                        key: key.clone(),
                        event_type: EventType::Added,
                    });
                    merged.insert(key, object);
                }
                Some(cached) if is_stale(cached.as_ref(), object.as_ref()) || cached == &object => {
                    merged.insert(key, cached.clone());
                }
                Some(_) => {
                    events.push(StoreEvent {
                        kind: K::KIND,
                        key: key.clone(),
                        event_type: EventType::Updated,
                    });
                    merged.insert(key, object);
                }
            }
        }

        for key in existing.keys() {
            if !merged.contains_key(key) {
                events.push(StoreEvent {
                    kind: K::KIND,
                    key: key.clone(),
                    event_type: EventType::Deleted,
                });
            }
        }

        tracing::info!(
            kind = %K::KIND,
            objects = merged.len(),
            changes = events.len(),
            "Relist complete"
        );

        let mut next = Snapshot::clone(&current);
        next.replace::<K>(merged);
        self.current.store(Arc::new(next));
        events
    }
}
