//! Host and path matching rules.
//!
//! # Responsibilities
//! - Match server names against certificate names (exact or wildcard)
//! - Validate hostnames taken from cluster objects
//! - Order servers and rules so that the first match is the most specific
//!
//! # Design Decisions
//! - Host matching is case-insensitive; hosts are normalized to lowercase
//! - A wildcard covers exactly one label (`*.example.com` does not match
//!   `example.com` or `a.b.example.com`)
//! - Path comparison is case-sensitive
//! - No regex to guarantee O(n) matching

use std::cmp::Ordering;

use crate::model::{RoutingRule, CATCH_ALL};

/// Matches a hostname against an exact or single-label wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMatcher {
    pattern: String,
}

impl HostMatcher {
    /// The pattern is normalized to lowercase for case-insensitive matching.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        if self.pattern == host {
            return true;
        }
        match self.pattern.strip_prefix("*.") {
            Some(suffix) => match host.split_once('.') {
                Some((label, rest)) => !label.is_empty() && label != "*" && rest == suffix,
                None => false,
            },
            None => false,
        }
    }
}

/// True for a DNS name, optionally with a leading `*.` wildcard label.
pub fn is_valid_hostname(host: &str) -> bool {
    let name = host.strip_prefix("*.").unwrap_or(host);
    if name.is_empty() || host.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}

fn host_class(host: &str) -> u8 {
    if host == CATCH_ALL {
        2
    } else if host.starts_with("*.") {
        1
    } else {
        0
    }
}

/// Server order: exact hosts, then wildcards, then the catch-all.
/// Within a class longer names come first, then lexicographic order.
pub fn host_order(a: &str, b: &str) -> Ordering {
    host_class(a)
        .cmp(&host_class(b))
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.cmp(b))
}

/// Rule order within a server: longest path first, exact before prefix,
/// then path text and finally the source object name.
pub fn rule_order(a: &RoutingRule, b: &RoutingRule) -> Ordering {
    b.path
        .len()
        .cmp(&a.path.len())
        .then_with(|| a.path_type.cmp(&b.path_type))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.source.cmp(&b.source))
}
