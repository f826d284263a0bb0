//! Routing Model
//!
//! The immutable result of one translation pass: virtual hosts with their
//! rules, the backends those rules reference and the certificates bound to
//! the hosts. A new model is built on every pass; the previous one is never
//! modified.
//!
//! # Design Decisions
//! - Backends and certificates are kept sorted by name and source so equal
//!   inputs always produce equal models
//! - `topology()` is the part of the model only a full reload can change

pub mod backend;
pub mod certificate;
pub mod server;
pub mod settings;

use std::fmt;

pub use backend::{
    Backend, BackendProtocol, Endpoint, HealthCheck, HealthState, LoadBalancePolicy, ServicePort,
};
pub use certificate::{Certificate, CertificateStatus};
pub use server::{Canary, PathType, RoutingRule, RuleModifiers, Server, CATCH_ALL};
pub use settings::ProxySettings;

use crate::store::ObjectKey;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingModel {
    pub settings: ProxySettings,
    pub servers: Vec<Server>,
    pub backends: Vec<Backend>,
    pub certificates: Vec<Certificate>,
}

impl RoutingModel {
    pub fn server(&self, hostname: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.hostname == hostname)
    }

    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends
            .binary_search_by(|b| b.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.backends[i])
    }

    pub fn certificate(&self, source: &ObjectKey) -> Option<&Certificate> {
        self.certificates
            .binary_search_by(|c| c.source.cmp(source))
            .ok()
            .map(|i| &self.certificates[i])
    }

    pub fn topology(&self) -> Topology<'_> {
        Topology {
            settings: &self.settings,
            servers: &self.servers,
            backends: self
                .backends
                .iter()
                .map(|b| BackendShape {
                    name: &b.name,
                    service: &b.service,
                    port: &b.port,
                    protocol: b.protocol,
                    policy: b.policy,
                    health_check: &b.health_check,
                })
                .collect(),
        }
    }
}

/// Everything in a model except endpoint sets and certificate content.
///
/// Servers carry certificate bindings by source only, so a renewed
/// certificate under the same secret leaves the topology unchanged.
#[derive(Debug, PartialEq, Eq)]
pub struct Topology<'a> {
    pub settings: &'a ProxySettings,
    pub servers: &'a [Server],
    pub backends: Vec<BackendShape<'a>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BackendShape<'a> {
    pub name: &'a str,
    pub service: &'a ObjectKey,
    pub port: &'a ServicePort,
    pub protocol: BackendProtocol,
    pub policy: LoadBalancePolicy,
    pub health_check: &'a HealthCheck,
}

/// Hex-encoded SHA-256 digest of a rendered configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
