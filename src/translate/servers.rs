//! Assembly of virtual hosts: rule merging, conflicts, canaries and
//! certificate binding.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use crate::certificates::{CertificateError, CertificateManager};
use crate::model::{Backend, Canary, Certificate, PathType, RoutingRule, Server, CATCH_ALL};
use crate::routing::{host_order, rule_order, HostMatcher};
use crate::store::objects::created_at;
use crate::store::{ObjectKey, Snapshot};
use crate::translate::defects::{DefectKind, Defects};
use crate::translate::ingress::{BackendRef, ParsedIngress, ParsedRule};
use crate::translate::TranslateOptions;

type RuleKey = (String, String, PathType);

/// Servers ordered for first-match evaluation, plus the certificates they
/// bind, sorted by source.
pub fn build_servers(
    snapshot: &Snapshot,
    ingresses: &[ParsedIngress],
    options: &TranslateOptions,
    certs: &CertificateManager,
    now: i64,
    defects: &mut Defects,
) -> (Vec<Server>, Vec<Certificate>) {
    let mut rules = primary_rules(ingresses, defects);
    attach_canaries(&mut rules, ingresses, defects);

    let mut by_host: BTreeMap<String, Vec<RoutingRule>> = BTreeMap::new();
    for ((host, _, _), rule) in rules {
        by_host.entry(host).or_default().push(rule);
    }

    let mut binder = CertificateBinder {
        snapshot,
        certs,
        now,
        resolved: BTreeMap::new(),
    };
    let tls_hosts = tls_hosts(ingresses);

    let mut servers: Vec<Server> = by_host
        .into_iter()
        .map(|(hostname, mut rules)| {
            rules.sort_by(rule_order);
            let certificate = binder.bind(&hostname, &tls_hosts, options, defects);
            Server {
                hostname,
                rules,
                certificate,
            }
        })
        .collect();
    servers.sort_by(|a, b| host_order(&a.hostname, &b.hostname));

    let mut certificates: Vec<Certificate> = Vec::new();
    for server in &servers {
        let Some(source) = &server.certificate else {
            continue;
        };
        if certificates.iter().any(|c| &c.source == source) {
            continue;
        }
        if let Some(Some(cert)) = binder.resolved.get(source) {
            certificates.push(cert.clone());
        }
    }
    certificates.sort_by(|a, b| a.source.cmp(&b.source));

    (servers, certificates)
}

fn rule_key(rule: &ParsedRule) -> RuleKey {
    (rule.host.clone(), rule.path.clone(), rule.path_type)
}

/// The rules an Ingress contributes, including its default backend.
fn ingress_rules(ingress: &ParsedIngress) -> Vec<ParsedRule> {
    let mut rules = ingress.rules.clone();
    if let Some(backend) = &ingress.default_backend {
        rules.push(ParsedRule {
            host: CATCH_ALL.to_string(),
            path: "/".to_string(),
            path_type: PathType::Prefix,
            backend: backend.clone(),
        });
    }
    rules
}

fn backend_name(reference: &BackendRef) -> String {
    Backend::name_for(&reference.service, &reference.port)
}

fn primary_rules(ingresses: &[ParsedIngress], defects: &mut Defects) -> BTreeMap<RuleKey, RoutingRule> {
    let mut rules = BTreeMap::new();

    for ingress in ingresses.iter().filter(|i| !i.is_canary()) {
        for parsed in ingress_rules(ingress) {
            match rules.entry(rule_key(&parsed)) {
                Entry::Occupied(existing) => {
                    let owner: &RoutingRule = existing.get();
                    if owner.source != ingress.key {
                        defects.ingress(
                            DefectKind::RuleConflict,
                            &ingress.key,
                            format!(
                                "{} {} {} is already routed by {}",
                                parsed.host, parsed.path_type, parsed.path, owner.source
                            ),
                        );
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(RoutingRule {
                        path: parsed.path.clone(),
                        path_type: parsed.path_type,
                        backend: backend_name(&parsed.backend),
                        source: ingress.key.clone(),
                        modifiers: ingress.annotations.rule.clone(),
                        canary: None,
                    });
                }
            }
        }
    }

    rules
}

fn attach_canaries(
    rules: &mut BTreeMap<RuleKey, RoutingRule>,
    ingresses: &[ParsedIngress],
    defects: &mut Defects,
) {
    for ingress in ingresses.iter().filter(|i| i.is_canary()) {
        let spec = &ingress.annotations.canary;
        for parsed in ingress_rules(ingress) {
            let Some(primary) = rules.get_mut(&rule_key(&parsed)) else {
                defects.ingress(
                    DefectKind::OrphanCanary,
                    &ingress.key,
                    format!(
                        "no primary rule for {} {} {}",
                        parsed.host, parsed.path_type, parsed.path
                    ),
                );
                continue;
            };

            match &primary.canary {
                Some(existing) if existing.source != ingress.key => {
                    defects.ingress(
                        DefectKind::RuleConflict,
                        &ingress.key,
                        format!(
                            "{} {} {} already has a canary from {}",
                            parsed.host, parsed.path_type, parsed.path, existing.source
                        ),
                    );
                }
                Some(_) => {}
                None => {
                    primary.canary = Some(Canary {
                        backend: backend_name(&parsed.backend),
                        weight: spec.weight,
                        header: spec.header.clone(),
                        source: ingress.key.clone(),
                    });
                }
            }
        }
    }
}

/// A TLS host pattern and the secret declared for it.
struct TlsHost<'a> {
    secret: Option<&'a ObjectKey>,
    ingress: &'a ObjectKey,
}

fn tls_hosts(ingresses: &[ParsedIngress]) -> Vec<(HostMatcher, TlsHost<'_>)> {
    let mut hosts = Vec::new();
    for ingress in ingresses {
        for section in &ingress.tls {
            for host in &section.hosts {
                hosts.push((
                    HostMatcher::new(host.as_str()),
                    TlsHost {
                        secret: section.secret.as_ref(),
                        ingress: &ingress.key,
                    },
                ));
            }
        }
    }
    hosts
}

struct CertificateBinder<'a> {
    snapshot: &'a Snapshot,
    certs: &'a CertificateManager,
    now: i64,
    /// Every secret looked up during this pass; `None` when unusable.
    resolved: BTreeMap<ObjectKey, Option<Certificate>>,
}

impl CertificateBinder<'_> {
    fn bind(
        &mut self,
        hostname: &str,
        tls_hosts: &[(HostMatcher, TlsHost<'_>)],
        options: &TranslateOptions,
        defects: &mut Defects,
    ) -> Option<ObjectKey> {
        let mut best: Option<(i64, ObjectKey)> = None;
        let mut requested_by = None;

        for (pattern, tls) in tls_hosts {
            if !pattern.matches(hostname) {
                continue;
            }
            requested_by.get_or_insert(tls.ingress);
            let Some(secret) = tls.secret else {
                continue;
            };
            let Some(cert) = self.resolve(secret, tls.ingress, defects) else {
                continue;
            };
            if !covers(cert, hostname) {
                continue;
            }
            // Newest certificate wins; equal ages fall back to the smaller source.
            let candidate = (cert.created_at, cert.source.clone());
            best = match best {
                Some(current)
                    if current.0 > candidate.0
                        || (current.0 == candidate.0 && current.1 <= candidate.1) =>
                {
                    Some(current)
                }
                _ => Some(candidate),
            };
        }

        let requested_by = requested_by?;
        if let Some((_, source)) = best {
            return Some(source);
        }

        if let Some(default) = &options.default_certificate {
            let fallback = self
                .resolve(default, requested_by, defects)
                .filter(|cert| covers(cert, hostname))
                .map(|cert| cert.source.clone());
            if let Some(source) = fallback {
                defects.ingress(
                    DefectKind::MissingCertificate,
                    requested_by,
                    format!("no usable certificate for {}, serving default {}", hostname, source),
                );
                return Some(source);
            }
        }

        defects.ingress(
            DefectKind::MissingCertificate,
            requested_by,
            format!("no usable certificate for {}", hostname),
        );
        None
    }

    fn resolve(
        &mut self,
        secret_key: &ObjectKey,
        requested_by: &ObjectKey,
        defects: &mut Defects,
    ) -> Option<&Certificate> {
        if !self.resolved.contains_key(secret_key) {
            let cert = self.load(secret_key, requested_by, defects);
            self.resolved.insert(secret_key.clone(), cert);
        }
        self.resolved.get(secret_key).and_then(Option::as_ref)
    }

    fn load(
        &self,
        secret_key: &ObjectKey,
        requested_by: &ObjectKey,
        defects: &mut Defects,
    ) -> Option<Certificate> {
        let Some(secret) = self.snapshot.get::<Secret>(secret_key) else {
            defects.ingress(
                DefectKind::MissingCertificate,
                requested_by,
                format!("secret {} not found", secret_key),
            );
            return None;
        };

        match self.certs.resolve(secret_key, secret) {
            Ok(parsed) => Some(Certificate {
                source: secret_key.clone(),
                server_names: parsed.server_names.clone(),
                certificate_pem: parsed.certificate_pem.clone(),
                key_pem: parsed.key_pem.clone(),
                fingerprint: parsed.fingerprint.clone(),
                not_before: parsed.not_before,
                not_after: parsed.not_after,
                status: self.certs.status(&parsed, self.now),
                created_at: created_at(secret.as_ref()),
            }),
            Err(CertificateError::KeyMismatch) => {
                defects.secret(
                    DefectKind::CertificateMismatch,
                    secret_key,
                    "private key does not match certificate",
                );
                None
            }
            Err(e) => {
                defects.secret(DefectKind::InvalidCertificate, secret_key, e.to_string());
                None
            }
        }
    }
}

fn covers(cert: &Certificate, hostname: &str) -> bool {
    cert.server_names
        .iter()
        .any(|name| HostMatcher::new(name.as_str()).matches(hostname))
}
