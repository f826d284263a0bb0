//! Model Translator
//!
//! # Responsibilities
//! - Turn a store snapshot into a `RoutingModel`
//! - Isolate bad objects: a defect is recorded and the rest still translates
//! - Produce the same model for the same snapshot, whatever the input order
//!
//! # Data Flow
//! ```text
//! Snapshot
//!     → settings.rs   (ConfigMap → ProxySettings)
//!     → ingress.rs    (class filter, validation, annotations.rs)
//!     → servers.rs    (merge by host, conflicts, canaries, certificates)
//!     → backends.rs   (routed Service + EndpointSlices → Backend)
//!     → Translation { model, defects }
//! ```
//!
//! # Design Decisions
//! - Ingresses are processed in key order; every tie-break follows from it
//! - Translation performs no I/O; the certificate cache only memoizes parsing

pub mod annotations;
pub mod backends;
pub mod defects;
pub mod ingress;
pub mod servers;
pub mod settings;

pub use defects::{Defect, DefectKind, ObjectRef};

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;

use crate::certificates::CertificateManager;
use crate::config::schema::IngressConfig;
use crate::model::{ProxySettings, RoutingModel};
use crate::store::{ObjectKey, ResourceKind, Snapshot};
use defects::Defects;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateOptions {
    pub ingress_class: String,
    /// Also handle Ingresses that name no class at all.
    pub watch_without_class: bool,
    pub annotation_prefix: String,
    /// ConfigMap holding global settings.
    pub configmap: Option<ObjectKey>,
    /// Secret served when a TLS host has no usable certificate.
    pub default_certificate: Option<ObjectKey>,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            ingress_class: "ingress-sync".to_string(),
            watch_without_class: false,
            annotation_prefix: "ingress-sync.io/".to_string(),
            configmap: None,
            default_certificate: None,
        }
    }
}

impl TranslateOptions {
    pub fn from_config(config: &IngressConfig) -> Self {
        Self {
            ingress_class: config.class.clone(),
            watch_without_class: config.watch_without_class,
            annotation_prefix: config.annotation_prefix.clone(),
            configmap: config.configmap.as_deref().and_then(ObjectKey::parse),
            default_certificate: config
                .default_ssl_certificate
                .as_deref()
                .and_then(ObjectKey::parse),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub model: RoutingModel,
    /// Sorted; empty when every object translated cleanly.
    pub defects: Vec<Defect>,
}

/// Translate a snapshot into a routing model.
///
/// `now` is unix seconds and only affects certificate status.
pub fn translate(
    snapshot: &Snapshot,
    options: &TranslateOptions,
    certs: &CertificateManager,
    now: i64,
) -> Translation {
    let mut defects = Defects::default();

    let settings = match &options.configmap {
        Some(key) => match snapshot.get::<ConfigMap>(key) {
            Some(config_map) => settings::parse_settings(key, config_map, &mut defects),
            None => ProxySettings::default(),
        },
        None => ProxySettings::default(),
    };

    let mut parsed = Vec::new();
    for (key, ingress) in snapshot.list::<Ingress>() {
        if !ingress::class_matches(ingress, options) {
            continue;
        }
        match ingress::parse_ingress(key, ingress, options, &mut defects) {
            Ok(p) => parsed.push(p),
            Err(reason) => defects.record(
                DefectKind::MalformedObject,
                Some((ResourceKind::Ingress, key)),
                reason,
            ),
        }
    }

    let (servers, certificates) =
        servers::build_servers(snapshot, &parsed, options, certs, now, &mut defects);
    let routed = backends::routed_backends(&servers);
    let backends = backends::build_backends(snapshot, &parsed, &routed, &settings, &mut defects);

    Translation {
        model: RoutingModel {
            settings,
            servers,
            backends,
            certificates,
        },
        defects: defects.into_sorted(),
    }
}
