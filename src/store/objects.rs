//! Identities and notifications for cached cluster objects.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::store::snapshot::Snapshot;
use crate::store::writer::RelistBuffers;

/// The resource kinds the controller watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ingress,
    Service,
    EndpointSlice,
    Secret,
    ConfigMap,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Ingress,
        ResourceKind::Service,
        ResourceKind::EndpointSlice,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "ingress",
            ResourceKind::Service => "service",
            ResourceKind::EndpointSlice => "endpoint_slice",
            ResourceKind::Secret => "secret",
            ResourceKind::ConfigMap => "config_map",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniquely identifies an object of a known kind by namespace and name.
///
/// Ordering is namespace first, then name; translation relies on it for
/// deterministic tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster object. Objects without a name cannot be cached.
    pub fn from_resource<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();
        let name = meta.name.clone().filter(|n| !n.is_empty())?;
        Some(Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name,
        })
    }

    /// Parse a `namespace/name` reference.
    pub fn parse(reference: &str) -> Option<Self> {
        let (namespace, name) = reference.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Added,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "added",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }
}

/// Emitted by the store writer after the snapshot containing the change
/// has been published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreEvent {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub event_type: EventType,
}

/// Per-kind object map shared between snapshots until a write touches it.
pub type ObjectMap<K> = Arc<BTreeMap<ObjectKey, Arc<K>>>;

/// A cluster type held by the store.
///
/// Each kind owns one slot in the snapshot and one relist buffer in the
/// writer, so updates for different kinds never share a write path.
pub trait StoredResource: Resource + Clone + PartialEq + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn objects(snapshot: &Snapshot) -> &ObjectMap<Self>;

    fn objects_mut(snapshot: &mut Snapshot) -> &mut ObjectMap<Self>;

    fn relist_buffer(buffers: &mut RelistBuffers) -> &mut Option<BTreeMap<ObjectKey, Arc<Self>>>;
}

/// The object's `resourceVersion` when it is numeric.
pub fn revision<K: Resource>(object: &K) -> Option<u64> {
    object.meta().resource_version.as_deref()?.parse().ok()
}

/// True when `incoming` carries an older revision than `current`.
pub fn is_stale<K: Resource>(current: &K, incoming: &K) -> bool {
    match (revision(current), revision(incoming)) {
        (Some(current), Some(incoming)) => incoming < current,
        _ => false,
    }
}

/// Creation time in unix seconds, zero when unset.
pub fn created_at<K: Resource>(object: &K) -> i64 {
    object
        .creation_timestamp()
        .map(|time| time.0.timestamp())
        .unwrap_or_default()
}

macro_rules! stored_resource {
    ($type:ty, $kind:expr, $field:ident) => {
        impl StoredResource for $type {
            const KIND: ResourceKind = $kind;

            fn objects(snapshot: &Snapshot) -> &ObjectMap<Self> {
                &snapshot.$field
            }

            fn objects_mut(snapshot: &mut Snapshot) -> &mut ObjectMap<Self> {
                &mut snapshot.$field
            }

            fn relist_buffer(
                buffers: &mut RelistBuffers,
            ) -> &mut Option<BTreeMap<ObjectKey, Arc<Self>>> {
                &mut buffers.$field
            }
        }
    };
}

stored_resource!(Ingress, ResourceKind::Ingress, ingresses);
stored_resource!(Service, ResourceKind::Service, services);
stored_resource!(EndpointSlice, ResourceKind::EndpointSlice, endpoint_slices);
stored_resource!(Secret, ResourceKind::Secret, secrets);
stored_resource!(ConfigMap, ResourceKind::ConfigMap, config_maps);
