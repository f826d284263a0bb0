//! Building snapshots from serialized objects.
//!
//! Accepts a JSON array of cluster objects or a `List` document with an
//! `items` array. Objects of unwatched kinds are reported and skipped.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;

use crate::store::objects::StoredResource;
use crate::store::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected an array of objects or a List with items")]
    NotAList,

    #[error("object {index} ({kind}): {source}")]
    Object {
        index: usize,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A loaded snapshot plus the kinds that were skipped.
#[derive(Debug, Default)]
pub struct LoadedObjects {
    pub snapshot: Snapshot,
    pub skipped: Vec<String>,
}

pub fn snapshot_from_json(text: &str) -> Result<LoadedObjects, OfflineError> {
    let document: Value = serde_json::from_str(text)?;
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(OfflineError::NotAList),
        },
        _ => return Err(OfflineError::NotAList),
    };

    let mut loaded = LoadedObjects::default();
    for (index, item) in items.into_iter().enumerate() {
        let kind = item
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let inserted = match kind.as_str() {
            "Ingress" => insert::<Ingress>(&mut loaded.snapshot, item),
            "Service" => insert::<Service>(&mut loaded.snapshot, item),
            "EndpointSlice" => insert::<EndpointSlice>(&mut loaded.snapshot, item),
            "Secret" => insert::<Secret>(&mut loaded.snapshot, item),
            "ConfigMap" => insert::<ConfigMap>(&mut loaded.snapshot, item),
            _ => {
                loaded.skipped.push(if kind.is_empty() { "<none>".into() } else { kind });
                continue;
            }
        };
        inserted.map_err(|source| OfflineError::Object {
            index,
            kind,
            source,
        })?;
    }
    Ok(loaded)
}

fn insert<K>(snapshot: &mut Snapshot, item: Value) -> Result<(), serde_json::Error>
where
    K: StoredResource + DeserializeOwned,
{
    let object: K = serde_json::from_value(item)?;
    snapshot.insert(object);
    Ok(())
}
