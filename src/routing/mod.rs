//! Routing order and matching.
//!
//! # Data Flow
//! ```text
//! Translated rules per host
//!     → matcher.rs (validate hosts, sort by specificity)
//!     → Ordered Server list (first match wins in the proxy)
//!
//! Certificate binding:
//!     Server hostname
//!     → HostMatcher over certificate names (exact or wildcard)
//! ```
//!
//! # Design Decisions
//! - Deterministic: the same rules always produce the same order
//! - No regex (exact, prefix and single-label wildcard only)

pub mod matcher;

pub use matcher::{host_order, is_valid_hostname, rule_order, HostMatcher};
