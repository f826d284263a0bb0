//! Annotation-driven behavior modifiers.
//!
//! Each modifier is a pure transform over an [`AnnotationContext`], looked up
//! in [`REGISTRY`] and applied in registry order. A transform either applies
//! completely or leaves the context untouched and reports why.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::model::{BackendProtocol, HealthCheck, LoadBalancePolicy, RuleModifiers};
use crate::store::ObjectKey;
use crate::translate::defects::{DefectKind, Defects};

/// Backend attributes requested by an Ingress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendOverrides {
    pub protocol: Option<BackendProtocol>,
    pub policy: Option<LoadBalancePolicy>,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanarySpec {
    pub enabled: bool,
    pub weight: u8,
    pub header: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationContext {
    pub backend: BackendOverrides,
    pub rule: RuleModifiers,
    pub canary: CanarySpec,
}

/// Prefixed view over an object's annotations.
pub struct Annotations<'a> {
    map: Option<&'a BTreeMap<String, String>>,
    prefix: &'a str,
}

impl<'a> Annotations<'a> {
    pub fn new(map: Option<&'a BTreeMap<String, String>>, prefix: &'a str) -> Self {
        Self { map, prefix }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.map?
            .get(&format!("{}{}", self.prefix, name))
            .map(|value| value.trim())
    }
}

type Transform = fn(&Annotations<'_>, &mut AnnotationContext) -> Result<(), String>;

pub struct Modifier {
    pub name: &'static str,
    pub keys: &'static [&'static str],
    apply: Transform,
}

/// Modifiers in precedence order.
pub const REGISTRY: &[Modifier] = &[
    Modifier {
        name: "backend-protocol",
        keys: &["backend-protocol"],
        apply: backend_protocol,
    },
    Modifier {
        name: "load-balance",
        keys: &["load-balance"],
        apply: load_balance,
    },
    Modifier {
        name: "health-check",
        keys: &["health-check-path", "health-check-interval"],
        apply: health_check,
    },
    Modifier {
        name: "rewrite-target",
        keys: &["rewrite-target"],
        apply: rewrite_target,
    },
    Modifier {
        name: "ssl-redirect",
        keys: &["ssl-redirect"],
        apply: ssl_redirect,
    },
    Modifier {
        name: "allowlist-source-range",
        keys: &["allowlist-source-range"],
        apply: allowlist,
    },
    Modifier {
        name: "proxy-timeouts",
        keys: &["proxy-connect-timeout", "proxy-read-timeout"],
        apply: proxy_timeouts,
    },
    Modifier {
        name: "canary",
        keys: &["canary", "canary-weight", "canary-by-header"],
        apply: canary,
    },
];

/// Build the modifier context for one object.
pub fn apply_annotations(
    annotations: &Annotations<'_>,
    source: &ObjectKey,
    defects: &mut Defects,
) -> AnnotationContext {
    let mut ctx = AnnotationContext::default();

    for modifier in REGISTRY {
        if modifier.keys.iter().all(|key| annotations.get(key).is_none()) {
            continue;
        }
        if let Err(reason) = (modifier.apply)(annotations, &mut ctx) {
            defects.ingress(
                DefectKind::InvalidAnnotation,
                source,
                format!("{}{}: {}", annotations.prefix, modifier.name, reason),
            );
        }
    }

    ctx
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

fn parse_seconds(value: &str) -> Result<u64, String> {
    match value.trim_end_matches('s').parse::<u64>() {
        Ok(0) => Err("must be greater than zero".into()),
        Ok(secs) => Ok(secs),
        Err(_) => Err(format!("'{}' is not a number of seconds", value)),
    }
}

fn backend_protocol(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    if let Some(value) = a.get("backend-protocol") {
        ctx.backend.protocol = Some(value.parse()?);
    }
    Ok(())
}

fn load_balance(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    if let Some(value) = a.get("load-balance") {
        ctx.backend.policy = Some(value.parse()?);
    }
    Ok(())
}

fn health_check(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    let path = match a.get("health-check-path") {
        Some(path) if path.starts_with('/') => Some(path.to_string()),
        Some(path) => return Err(format!("path '{}' must start with '/'", path)),
        None => None,
    };
    let interval_secs = a.get("health-check-interval").map(parse_seconds).transpose()?;

    ctx.backend.health_check = HealthCheck {
        path,
        interval_secs,
    };
    Ok(())
}

fn rewrite_target(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    match a.get("rewrite-target") {
        Some("") => Err("must not be empty".into()),
        Some(target) => {
            ctx.rule.rewrite_target = Some(target.to_string());
            Ok(())
        }
        None => Ok(()),
    }
}

fn ssl_redirect(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    if let Some(value) = a.get("ssl-redirect") {
        ctx.rule.ssl_redirect = Some(parse_bool(value)?);
    }
    Ok(())
}

fn allowlist(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    let Some(value) = a.get("allowlist-source-range") else {
        return Ok(());
    };

    let mut ranges = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let net = match entry.parse::<IpNet>() {
            Ok(net) => net.trunc(),
            Err(_) => entry
                .parse::<IpAddr>()
                .map(IpNet::from)
                .map_err(|_| format!("'{}' is not a CIDR range", entry))?,
        };
        ranges.push(net);
    }
    ranges.sort();
    ranges.dedup();

    ctx.rule.allowlist = ranges;
    Ok(())
}

fn proxy_timeouts(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    let connect = a.get("proxy-connect-timeout").map(parse_seconds).transpose()?;
    let read = a.get("proxy-read-timeout").map(parse_seconds).transpose()?;
    ctx.rule.connect_timeout_secs = connect;
    ctx.rule.read_timeout_secs = read;
    Ok(())
}

fn canary(a: &Annotations<'_>, ctx: &mut AnnotationContext) -> Result<(), String> {
    let enabled = a.get("canary").map(parse_bool).transpose()?.unwrap_or(false);
    let weight = match a.get("canary-weight") {
        Some(value) => match value.parse::<u8>() {
            Ok(weight) if weight <= 100 => weight,
            _ => return Err(format!("weight '{}' must be between 0 and 100", value)),
        },
        None => 0,
    };
    let header = match a.get("canary-by-header") {
        Some("") => return Err("header name must not be empty".into()),
        Some(header) => Some(header.to_string()),
        None => None,
    };

    ctx.canary = CanarySpec {
        enabled,
        weight,
        header,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "ingress-sync.io/";

    fn run(pairs: &[(&str, &str)]) -> (AnnotationContext, Vec<crate::translate::Defect>) {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", PREFIX, k), v.to_string()))
            .collect();
        let mut defects = Defects::default();
        let ctx = apply_annotations(
            &Annotations::new(Some(&map), PREFIX),
            &ObjectKey::new("default", "web"),
            &mut defects,
        );
        (ctx, defects.into_sorted())
    }

    #[test]
    fn test_no_annotations() {
        let (ctx, defects) = run(&[]);
        assert_eq!(ctx, AnnotationContext::default());
        assert!(defects.is_empty());
    }

    #[test]
    fn test_rule_modifiers() {
        let (ctx, defects) = run(&[
            ("rewrite-target", "/"),
            ("ssl-redirect", "false"),
            ("allowlist-source-range", "10.0.0.0/8, 192.168.1.7"),
            ("proxy-read-timeout", "120"),
        ]);
        assert!(defects.is_empty());
        assert_eq!(ctx.rule.rewrite_target.as_deref(), Some("/"));
        assert_eq!(ctx.rule.ssl_redirect, Some(false));
        assert_eq!(ctx.rule.allowlist.len(), 2);
        assert_eq!(ctx.rule.read_timeout_secs, Some(120));
        assert_eq!(ctx.rule.connect_timeout_secs, None);
    }

    #[test]
    fn test_backend_overrides() {
        let (ctx, defects) = run(&[
            ("backend-protocol", "GRPC"),
            ("load-balance", "ewma"),
            ("health-check-path", "/healthz"),
            ("health-check-interval", "10s"),
        ]);
        assert!(defects.is_empty());
        assert_eq!(ctx.backend.protocol, Some(BackendProtocol::Grpc));
        assert_eq!(ctx.backend.policy, Some(LoadBalancePolicy::Ewma));
        assert_eq!(ctx.backend.health_check.path.as_deref(), Some("/healthz"));
        assert_eq!(ctx.backend.health_check.interval_secs, Some(10));
    }

    #[test]
    fn test_invalid_value_is_ignored_and_reported() {
        let (ctx, defects) = run(&[
            ("allowlist-source-range", "10.0.0.0/8,not-a-range"),
            ("ssl-redirect", "false"),
        ]);
        // The bad modifier is skipped as a whole; the others still apply.
        assert!(ctx.rule.allowlist.is_empty());
        assert_eq!(ctx.rule.ssl_redirect, Some(false));
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].kind, DefectKind::InvalidAnnotation);
        assert!(defects[0].message.contains("allowlist-source-range"));
    }

    #[test]
    fn test_canary() {
        let (ctx, defects) = run(&[
            ("canary", "true"),
            ("canary-weight", "20"),
            ("canary-by-header", "X-Canary"),
        ]);
        assert!(defects.is_empty());
        assert!(ctx.canary.enabled);
        assert_eq!(ctx.canary.weight, 20);
        assert_eq!(ctx.canary.header.as_deref(), Some("X-Canary"));

        let (ctx, defects) = run(&[("canary", "true"), ("canary-weight", "150")]);
        assert!(!ctx.canary.enabled);
        assert_eq!(defects.len(), 1);
    }

    #[test]
    fn test_foreign_prefix_is_ignored() {
        let mut map = BTreeMap::new();
        map.insert("other.io/ssl-redirect".to_string(), "bogus".to_string());
        let mut defects = Defects::default();
        let ctx = apply_annotations(
            &Annotations::new(Some(&map), PREFIX),
            &ObjectKey::new("default", "web"),
            &mut defects,
        );
        assert_eq!(ctx, AnnotationContext::default());
        assert!(defects.into_sorted().is_empty());
    }
}
