//! Validation and normalization of a single Ingress.

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};

use crate::model::{PathType, ServicePort, CATCH_ALL};
use crate::routing::is_valid_hostname;
use crate::store::objects::created_at;
use crate::store::ObjectKey;
use crate::translate::annotations::{apply_annotations, AnnotationContext, Annotations};
use crate::translate::defects::Defects;
use crate::translate::TranslateOptions;

/// Legacy class annotation, still honored next to `spec.ingressClassName`.
pub const CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackendRef {
    pub service: ObjectKey,
    pub port: ServicePort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    /// Lower-cased host, or the catch-all name.
    pub host: String,
    pub path: String,
    pub path_type: PathType,
    pub backend: BackendRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSection {
    pub hosts: Vec<String>,
    pub secret: Option<ObjectKey>,
}

/// An Ingress that passed validation.
#[derive(Debug, Clone)]
pub struct ParsedIngress {
    pub key: ObjectKey,
    pub created_at: i64,
    pub annotations: AnnotationContext,
    pub rules: Vec<ParsedRule>,
    pub default_backend: Option<BackendRef>,
    pub tls: Vec<TlsSection>,
}

impl ParsedIngress {
    pub fn is_canary(&self) -> bool {
        self.annotations.canary.enabled
    }

    /// Every backend this Ingress references.
    pub fn backends(&self) -> impl Iterator<Item = &BackendRef> {
        self.rules
            .iter()
            .map(|r| &r.backend)
            .chain(self.default_backend.iter())
    }
}

/// True when the Ingress belongs to this controller.
pub fn class_matches(ingress: &Ingress, options: &TranslateOptions) -> bool {
    let spec_class = ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref());
    let annotation_class = ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CLASS_ANNOTATION))
        .map(String::as_str);

    match (spec_class, annotation_class) {
        (None, None) => options.watch_without_class,
        (spec, annotation) => {
            spec == Some(options.ingress_class.as_str())
                || annotation == Some(options.ingress_class.as_str())
        }
    }
}

/// Validate an Ingress. Any structural problem rejects the whole object;
/// annotation problems only drop the affected modifier.
pub fn parse_ingress(
    key: &ObjectKey,
    ingress: &Ingress,
    options: &TranslateOptions,
    defects: &mut Defects,
) -> Result<ParsedIngress, String> {
    let spec = ingress.spec.as_ref().ok_or("ingress has no spec")?;

    let mut rules = Vec::new();
    for rule in spec.rules.iter().flatten() {
        let host = normalize_host(rule.host.as_deref())?;
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        for path in &http.paths {
            let path_type = match path.path_type.as_str() {
                "Exact" => PathType::Exact,
                "Prefix" | "ImplementationSpecific" => PathType::Prefix,
                other => return Err(format!("unknown path type '{}'", other)),
            };
            let path_value = match path.path.as_deref() {
                None | Some("") => "/".to_string(),
                Some(p) if p.starts_with('/') => p.to_string(),
                Some(p) => return Err(format!("path '{}' must start with '/'", p)),
            };
            rules.push(ParsedRule {
                host: host.clone(),
                path: path_value,
                path_type,
                backend: backend_ref(&key.namespace, &path.backend)?,
            });
        }
    }

    let default_backend = spec
        .default_backend
        .as_ref()
        .map(|b| backend_ref(&key.namespace, b))
        .transpose()?;

    let mut tls = Vec::new();
    for section in spec.tls.iter().flatten() {
        let mut hosts = Vec::new();
        for host in section.hosts.iter().flatten() {
            let host = normalize_host(Some(host))?;
            if host != CATCH_ALL {
                hosts.push(host);
            }
        }
        hosts.sort();
        hosts.dedup();
        tls.push(TlsSection {
            hosts,
            secret: section
                .secret_name
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|name| ObjectKey::new(key.namespace.clone(), name)),
        });
    }

    let annotations = apply_annotations(
        &Annotations::new(ingress.metadata.annotations.as_ref(), &options.annotation_prefix),
        key,
        defects,
    );

    Ok(ParsedIngress {
        key: key.clone(),
        created_at: created_at(ingress),
        annotations,
        rules,
        default_backend,
        tls,
    })
}

fn normalize_host(host: Option<&str>) -> Result<String, String> {
    match host.map(str::trim) {
        None | Some("") => Ok(CATCH_ALL.to_string()),
        Some(host) => {
            let host = host.to_lowercase();
            if is_valid_hostname(&host) {
                Ok(host)
            } else {
                Err(format!("invalid host '{}'", host))
            }
        }
    }
}

fn backend_ref(namespace: &str, backend: &IngressBackend) -> Result<BackendRef, String> {
    if backend.resource.is_some() {
        return Err("resource backends are not supported".into());
    }
    let service = backend
        .service
        .as_ref()
        .ok_or("backend has no service")?;
    if service.name.is_empty() {
        return Err("backend service has no name".into());
    }

    let port = service.port.as_ref().ok_or("backend service has no port")?;
    let port = match (port.number, port.name.as_deref()) {
        (Some(number), _) if (1..=65535).contains(&number) => ServicePort::Number(number),
        (Some(number), _) => return Err(format!("invalid service port {}", number)),
        (None, Some(name)) if !name.is_empty() => ServicePort::Name(name.to_string()),
        _ => return Err("backend service port has neither number nor name".into()),
    };

    Ok(BackendRef {
        service: ObjectKey::new(namespace, service.name.clone()),
        port,
    })
}
