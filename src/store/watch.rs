//! Cluster watch streams feeding the store writer.
//!
//! # Data Flow
//! ```text
//! watcher(Ingress) ─┐
//! watcher(Service) ─┤
//! watcher(Slices)  ─┼─> mpsc<WatchEvent> ─> ingest ─> StoreWriter ─> on_event
//! watcher(Secret)  ─┤
//! watcher(ConfigMap)┘
//! ```
//!
//! Each stream reconnects on its own with backoff. A reconnect always
//! starts with a relist, which the writer turns into synthetic events.

use std::fmt::Debug;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::store::objects::{StoreEvent, StoredResource};
use crate::store::writer::StoreWriter;

/// A watch event tagged with its kind.
#[derive(Debug)]
pub enum WatchEvent {
    Ingress(watcher::Event<Ingress>),
    Service(watcher::Event<Service>),
    EndpointSlice(watcher::Event<EndpointSlice>),
    Secret(watcher::Event<Secret>),
    ConfigMap(watcher::Event<ConfigMap>),
}

impl StoreWriter {
    pub fn apply_watch_event(&mut self, event: WatchEvent) -> Vec<StoreEvent> {
        match event {
            WatchEvent::Ingress(e) => self.apply(e),
            WatchEvent::Service(e) => self.apply(e),
            WatchEvent::EndpointSlice(e) => self.apply(e),
            WatchEvent::Secret(e) => self.apply(e),
            WatchEvent::ConfigMap(e) => self.apply(e),
        }
    }
}

/// Start one watch task per kind.
///
/// `namespace` restricts every watch to a single namespace; `None` watches
/// the whole cluster.
pub fn spawn_watchers(
    client: Client,
    namespace: Option<&str>,
    tx: mpsc::Sender<WatchEvent>,
    shutdown: &Shutdown,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_watcher::<Ingress>(api(&client, namespace), tx.clone(), shutdown, WatchEvent::Ingress),
        spawn_watcher::<Service>(api(&client, namespace), tx.clone(), shutdown, WatchEvent::Service),
        spawn_watcher::<EndpointSlice>(
            api(&client, namespace),
            tx.clone(),
            shutdown,
            WatchEvent::EndpointSlice,
        ),
        spawn_watcher::<Secret>(api(&client, namespace), tx.clone(), shutdown, WatchEvent::Secret),
        spawn_watcher::<ConfigMap>(api(&client, namespace), tx, shutdown, WatchEvent::ConfigMap),
    ]
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn spawn_watcher<K>(
    api: Api<K>,
    tx: mpsc::Sender<WatchEvent>,
    shutdown: &Shutdown,
    wrap: fn(watcher::Event<K>) -> WatchEvent,
) -> JoinHandle<()>
where
    K: StoredResource + DeserializeOwned + Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        futures_util::pin_mut!(stream);

        tracing::info!(kind = %K::KIND, "Watch started");

        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(event)) => {
                            if tx.send(wrap(event)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            metrics::record_watch_error(K::KIND);
                            tracing::warn!(kind = %K::KIND, error = %e, "Watch stream error, reconnecting");
                        }
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        tracing::info!(kind = %K::KIND, "Watch stopped");
    })
}

/// Drain watch events into the store, invoking `on_event` for every change
/// after it has been published.
pub async fn ingest<F>(
    mut writer: StoreWriter,
    mut rx: mpsc::Receiver<WatchEvent>,
    mut on_event: F,
    shutdown: &Shutdown,
) where
    F: FnMut(StoreEvent),
{
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            item = rx.recv() => {
                let Some(event) = item else { break };
                for change in writer.apply_watch_event(event) {
                    tracing::debug!(
                        kind = %change.kind,
                        key = %change.key,
                        event = change.event_type.as_str(),
                        "Store changed"
                    );
                    on_event(change);
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
