//! Virtual hosts and their routing rules.

use std::fmt;

use ipnet::IpNet;

use crate::store::ObjectKey;

/// Server name used for rules without a host.
pub const CATCH_ALL: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathType {
    Exact,
    Prefix,
}

impl PathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Exact => "exact",
            PathType::Prefix => "prefix",
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alternative backend receiving part of a rule's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canary {
    pub backend: String,
    /// Percentage of traffic, 0 to 100.
    pub weight: u8,
    /// Requests carrying this header always go to the canary.
    pub header: Option<String>,
    pub source: ObjectKey,
}

/// Per-rule behavior derived from annotations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleModifiers {
    pub rewrite_target: Option<String>,
    pub ssl_redirect: Option<bool>,
    pub allowlist: Vec<IpNet>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

/// A host/path mapping to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub path: String,
    pub path_type: PathType,
    pub backend: String,
    /// The Ingress the rule came from.
    pub source: ObjectKey,
    pub modifiers: RuleModifiers,
    pub canary: Option<Canary>,
}

/// A virtual host. Rules are ordered so that the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub hostname: String,
    pub rules: Vec<RoutingRule>,
    /// Secret providing the bound certificate.
    pub certificate: Option<ObjectKey>,
}

impl Server {
    pub fn is_catch_all(&self) -> bool {
        self.hostname == CATCH_ALL
    }
}
