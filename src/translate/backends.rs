//! Resolution of service references into backends with endpoints.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{Service, ServicePort as ServicePortSpec};
use k8s_openapi::api::discovery::v1::EndpointSlice;

use crate::model::{Backend, Endpoint, HealthState, ProxySettings, Server, ServicePort};
use crate::store::{ObjectKey, Snapshot};
use crate::translate::annotations::BackendOverrides;
use crate::translate::defects::{DefectKind, Defects};
use crate::translate::ingress::{BackendRef, ParsedIngress};

/// Label linking an EndpointSlice to its Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Backend settings merged across every Ingress referencing it.
struct BackendSource<'a> {
    reference: &'a BackendRef,
    overrides: BackendOverrides,
    /// Ingress that referenced the backend first, used for defects.
    owner: &'a ObjectKey,
}

/// Names of the backends the servers route to, canaries included.
pub fn routed_backends(servers: &[Server]) -> BTreeSet<String> {
    servers
        .iter()
        .flat_map(|server| &server.rules)
        .flat_map(|rule| {
            std::iter::once(rule.backend.clone())
                .chain(rule.canary.as_ref().map(|canary| canary.backend.clone()))
        })
        .collect()
}

/// Build every backend named in `routed`, sorted by name.
///
/// References from rules that lost a conflict or from orphan canaries are
/// skipped. `ingresses` must be sorted by key: the first Ingress to set a
/// backend attribute wins, later ones that disagree are reported.
pub fn build_backends(
    snapshot: &Snapshot,
    ingresses: &[ParsedIngress],
    routed: &BTreeSet<String>,
    settings: &ProxySettings,
    defects: &mut Defects,
) -> Vec<Backend> {
    let mut sources: BTreeMap<String, BackendSource<'_>> = BTreeMap::new();

    for ingress in ingresses {
        let overrides = &ingress.annotations.backend;
        for reference in ingress.backends() {
            let name = Backend::name_for(&reference.service, &reference.port);
            if !routed.contains(&name) {
                continue;
            }
            match sources.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(BackendSource {
                        reference,
                        overrides: overrides.clone(),
                        owner: &ingress.key,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let name = slot.key().clone();
                    merge_overrides(
                        &mut slot.get_mut().overrides,
                        overrides,
                        &name,
                        &ingress.key,
                        defects,
                    );
                }
            }
        }
    }

    sources
        .into_iter()
        .map(|(name, source)| {
            let endpoints = resolve_endpoints(snapshot, source.reference, source.owner, defects);
            Backend {
                name,
                service: source.reference.service.clone(),
                port: source.reference.port.clone(),
                protocol: source.overrides.protocol.unwrap_or_default(),
                policy: source.overrides.policy.unwrap_or(settings.load_balance),
                health_check: source.overrides.health_check,
                endpoints,
            }
        })
        .collect()
}

fn merge_overrides(
    existing: &mut BackendOverrides,
    incoming: &BackendOverrides,
    backend: &str,
    source: &ObjectKey,
    defects: &mut Defects,
) {
    let mut conflicts = Vec::new();
    merge_field(&mut existing.protocol, &incoming.protocol, "backend-protocol", &mut conflicts);
    merge_field(&mut existing.policy, &incoming.policy, "load-balance", &mut conflicts);
    merge_field(
        &mut existing.health_check.path,
        &incoming.health_check.path,
        "health-check-path",
        &mut conflicts,
    );
    merge_field(
        &mut existing.health_check.interval_secs,
        &incoming.health_check.interval_secs,
        "health-check-interval",
        &mut conflicts,
    );

    for field in conflicts {
        defects.ingress(
            DefectKind::ConflictingAnnotation,
            source,
            format!("{} for backend {} is already set by another ingress", field, backend),
        );
    }
}

fn merge_field<T: Clone + PartialEq>(
    existing: &mut Option<T>,
    incoming: &Option<T>,
    field: &'static str,
    conflicts: &mut Vec<&'static str>,
) {
    match (existing.as_ref(), incoming) {
        (None, Some(value)) => *existing = Some(value.clone()),
        (Some(current), Some(value)) if current != value => conflicts.push(field),
        _ => {}
    }
}

fn resolve_endpoints(
    snapshot: &Snapshot,
    reference: &BackendRef,
    owner: &ObjectKey,
    defects: &mut Defects,
) -> Vec<Endpoint> {
    let Some(service) = snapshot.get::<Service>(&reference.service) else {
        defects.ingress(
            DefectKind::UnresolvedBackend,
            owner,
            format!("service {} not found", reference.service),
        );
        return Vec::new();
    };
    let spec = service.spec.as_ref();

    let port = spec
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| port_matches(p, &reference.port)));

    if spec.and_then(|s| s.type_.as_deref()) == Some("ExternalName") {
        let external = spec.and_then(|s| s.external_name.as_deref()).unwrap_or_default();
        let port_number = match (&reference.port, port) {
            (ServicePort::Number(n), _) => Some(*n),
            (ServicePort::Name(_), Some(p)) => Some(p.port),
            (ServicePort::Name(_), None) => None,
        };
        return match port_number.and_then(|n| u16::try_from(n).ok()) {
            Some(n) if !external.is_empty() => vec![Endpoint::new(external.to_lowercase(), n)],
            _ => {
                defects.ingress(
                    DefectKind::UnresolvedBackend,
                    owner,
                    format!(
                        "external service {} has no usable name or port {}",
                        reference.service, reference.port
                    ),
                );
                Vec::new()
            }
        };
    }

    let Some(port) = port else {
        defects.ingress(
            DefectKind::UnresolvedBackend,
            owner,
            format!("service {} has no port {}", reference.service, reference.port),
        );
        return Vec::new();
    };
    let port_name = port.name.as_deref().unwrap_or_default();

    let mut endpoints = Vec::new();
    for (key, slice) in snapshot.list::<EndpointSlice>() {
        if key.namespace != reference.service.namespace || !owned_by(slice, &reference.service.name)
        {
            continue;
        }
        let Some(target) = slice
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
            .and_then(|p| p.port)
            .and_then(|p| u16::try_from(p).ok())
        else {
            continue;
        };

        for endpoint in &slice.endpoints {
            let health = HealthState::from_ready(endpoint.conditions.as_ref().and_then(|c| c.ready));
            for address in &endpoint.addresses {
                endpoints.push(Endpoint {
                    address: address.clone(),
                    port: target,
                    health,
                    weight: 1,
                    zone: endpoint.zone.clone(),
                });
            }
        }
    }

    endpoints.sort();
    endpoints.dedup_by(|a, b| a.address == b.address && a.port == b.port);
    endpoints
}

fn port_matches(port: &ServicePortSpec, wanted: &ServicePort) -> bool {
    match wanted {
        ServicePort::Number(n) => port.port == *n,
        ServicePort::Name(name) => port.name.as_deref() == Some(name.as_str()),
    }
}

fn owned_by(slice: &EndpointSlice, service: &str) -> bool {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(SERVICE_NAME_LABEL))
        .is_some_and(|name| name == service)
}
