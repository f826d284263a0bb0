//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define controller metrics (reconciles, reloads, dynamic updates, defects)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ingress_sync_reconcile_attempts_total` (counter): attempts by outcome
//! - `ingress_sync_reloads_total` (counter): full reloads by result
//! - `ingress_sync_dynamic_updates_total` (counter): side-channel pushes by result
//! - `ingress_sync_translation_defects_total` (counter): defects by kind
//! - `ingress_sync_store_events_total` (counter): store changes by kind, event
//! - `ingress_sync_watch_errors_total` (counter): watch stream errors by kind
//! - `ingress_sync_certificate_expiry_seconds` (gauge): seconds until expiry
//! - `ingress_sync_degraded` (gauge): 1 while reload retries are exhausted
//!
//! # Design Decisions
//! - Label values are fixed enums except certificate sources
//! - Recording without an installed exporter is a no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::store::{EventType, ObjectKey, ResourceKind};
use crate::translate::DefectKind;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_reconcile(outcome: &'static str) {
    counter!("ingress_sync_reconcile_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("ingress_sync_reloads_total", "result" => result).increment(1);
}

pub fn record_dynamic_update(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("ingress_sync_dynamic_updates_total", "result" => result).increment(1);
}

pub fn record_defect(kind: DefectKind) {
    counter!("ingress_sync_translation_defects_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_store_event(kind: ResourceKind, event: EventType) {
    counter!(
        "ingress_sync_store_events_total",
        "kind" => kind.as_str(),
        "event" => event.as_str()
    )
    .increment(1);
}

pub fn record_watch_error(kind: ResourceKind) {
    counter!("ingress_sync_watch_errors_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_certificate_expiry(secret: &ObjectKey, seconds: i64) {
    gauge!("ingress_sync_certificate_expiry_seconds", "secret" => secret.to_string())
        .set(seconds as f64);
}

pub fn set_degraded(degraded: bool) {
    gauge!("ingress_sync_degraded").set(if degraded { 1.0 } else { 0.0 });
}
