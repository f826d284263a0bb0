//! Backends and their endpoints.
//!
//! # Design Decisions
//! - Endpoint sets are replaced wholesale on every translation pass
//! - Health is carried as observed from the cluster; the proxy decides
//!   whether `Unknown` endpoints receive traffic

use std::fmt;
use std::str::FromStr;

use crate::store::ObjectKey;

/// Endpoint health as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn from_ready(ready: Option<bool>) -> Self {
        match ready {
            Some(true) => HealthState::Healthy,
            Some(false) => HealthState::Unhealthy,
            None => HealthState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// One network address serving a backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub health: HealthState,
    pub weight: u32,
    pub zone: Option<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            health: HealthState::Unknown,
            weight: 1,
            zone: None,
        }
    }
}

/// Load-balancing algorithm requested for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadBalancePolicy {
    #[default]
    RoundRobin,
    LeastConn,
    Ewma,
}

impl LoadBalancePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancePolicy::RoundRobin => "round_robin",
            LoadBalancePolicy::LeastConn => "least_conn",
            LoadBalancePolicy::Ewma => "ewma",
        }
    }
}

impl FromStr for LoadBalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round_robin" => Ok(LoadBalancePolicy::RoundRobin),
            "least_conn" => Ok(LoadBalancePolicy::LeastConn),
            "ewma" => Ok(LoadBalancePolicy::Ewma),
            other => Err(format!("unknown load-balance policy '{}'", other)),
        }
    }
}

/// Protocol the proxy speaks to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendProtocol {
    #[default]
    Http,
    Https,
    Grpc,
    Grpcs,
}

impl BackendProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendProtocol::Http => "HTTP",
            BackendProtocol::Https => "HTTPS",
            BackendProtocol::Grpc => "GRPC",
            BackendProtocol::Grpcs => "GRPCS",
        }
    }
}

impl FromStr for BackendProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTTP" => Ok(BackendProtocol::Http),
            "HTTPS" => Ok(BackendProtocol::Https),
            "GRPC" => Ok(BackendProtocol::Grpc),
            "GRPCS" => Ok(BackendProtocol::Grpcs),
            _ => Err(format!("unknown backend protocol '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HealthCheck {
    pub path: Option<String>,
    pub interval_secs: Option<u64>,
}

/// A service port as referenced by an Ingress backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServicePort {
    Number(i32),
    Name(String),
}

impl fmt::Display for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePort::Number(n) => write!(f, "{}", n),
            ServicePort::Name(name) => f.write_str(name),
        }
    }
}

/// A named pool of endpoints behind one service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// `{namespace}-{service}-{port}`
    pub name: String,
    pub service: ObjectKey,
    pub port: ServicePort,
    pub protocol: BackendProtocol,
    pub policy: LoadBalancePolicy,
    pub health_check: HealthCheck,
    pub endpoints: Vec<Endpoint>,
}

impl Backend {
    pub fn name_for(service: &ObjectKey, port: &ServicePort) -> String {
        format!("{}-{}-{}", service.namespace, service.name, port)
    }

    pub fn healthy_endpoints(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|e| e.health == HealthState::Healthy)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name() {
        let service = ObjectKey::new("shop", "web");
        assert_eq!(Backend::name_for(&service, &ServicePort::Number(80)), "shop-web-80");
        assert_eq!(
            Backend::name_for(&service, &ServicePort::Name("http".into())),
            "shop-web-http"
        );
    }

    #[test]
    fn test_health_from_ready() {
        assert_eq!(HealthState::from_ready(Some(true)), HealthState::Healthy);
        assert_eq!(HealthState::from_ready(Some(false)), HealthState::Unhealthy);
        assert_eq!(HealthState::from_ready(None), HealthState::Unknown);
    }

    #[test]
    fn test_parse_policy_and_protocol() {
        assert_eq!("least_conn".parse(), Ok(LoadBalancePolicy::LeastConn));
        assert!("random".parse::<LoadBalancePolicy>().is_err());
        assert_eq!("grpc".parse(), Ok(BackendProtocol::Grpc));
        assert!("ftp".parse::<BackendProtocol>().is_err());
    }
}
