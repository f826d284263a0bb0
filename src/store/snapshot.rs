//! Immutable views of the object cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;

use crate::store::objects::{ObjectKey, ObjectMap, StoredResource};

/// A point-in-time copy of every watched kind.
///
/// Cloning is cheap: each kind is an `Arc`-shared map that is only copied
/// when the writer changes that kind.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) ingresses: ObjectMap<Ingress>,
    pub(crate) services: ObjectMap<Service>,
    pub(crate) endpoint_slices: ObjectMap<EndpointSlice>,
    pub(crate) secrets: ObjectMap<Secret>,
    pub(crate) config_maps: ObjectMap<ConfigMap>,
}

impl Snapshot {
    pub fn get<K: StoredResource>(&self, key: &ObjectKey) -> Option<&Arc<K>> {
        K::objects(self).get(key)
    }

    /// All objects of a kind, ordered by key.
    pub fn list<K: StoredResource>(&self) -> impl Iterator<Item = (&ObjectKey, &Arc<K>)> {
        K::objects(self).iter()
    }

    pub fn len<K: StoredResource>(&self) -> usize {
        K::objects(self).len()
    }

    /// Insert an object directly, bypassing revision checks.
    ///
    /// Used for offline rendering where no watch stream exists.
    pub fn insert<K: StoredResource>(&mut self, object: K) -> Option<ObjectKey> {
        let key = ObjectKey::from_resource(&object)?;
        Arc::make_mut(K::objects_mut(self)).insert(key.clone(), Arc::new(object));
        Some(key)
    }

    pub(crate) fn replace<K: StoredResource>(&mut self, objects: BTreeMap<ObjectKey, Arc<K>>) {
        *K::objects_mut(self) = Arc::new(objects);
    }
}
