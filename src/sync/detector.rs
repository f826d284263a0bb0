//! Classification of model changes.
//!
//! # Responsibilities
//! - Recognize passes that change nothing the proxy can observe
//! - Isolate endpoint-only changes that the control channel can apply
//! - Escalate everything else to a full reload
//!
//! # Design Decisions
//! - Fingerprint equality is checked first, so a NoOp never depends on
//!   structural comparison
//! - Anything the detector cannot attribute to endpoints or certificate
//!   content falls back to a full reload

use std::fmt;

use crate::model::{Backend, Certificate, Fingerprint, RoutingModel};
use crate::sync::state::AppliedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// Nothing has been applied yet.
    Initial,
    Topology,
    /// A certificate changed and the proxy cannot swap it in place.
    CertificateContent,
    DynamicUpdateFailed,
}

impl ReloadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadReason::Initial => "initial",
            ReloadReason::Topology => "topology",
            ReloadReason::CertificateContent => "certificate_content",
            ReloadReason::DynamicUpdateFailed => "dynamic_update_failed",
        }
    }
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Items that can be pushed to the running proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicChanges {
    pub backends: Vec<Backend>,
    pub certificates: Vec<Certificate>,
}

impl DynamicChanges {
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty() && self.certificates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    NoOp,
    DynamicUpdate(DynamicChanges),
    FullReload(ReloadReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    hot_certificate_swap: bool,
}

impl ChangeDetector {
    pub fn new(hot_certificate_swap: bool) -> Self {
        Self {
            hot_certificate_swap,
        }
    }

    pub fn diff(
        &self,
        previous: Option<&AppliedState>,
        next: &RoutingModel,
        fingerprint: &Fingerprint,
    ) -> Change {
        let Some(previous) = previous else {
            return Change::FullReload(ReloadReason::Initial);
        };
        if previous.fingerprint == *fingerprint {
            return Change::NoOp;
        }

        let before = previous.model.as_ref();
        if before.topology() != next.topology() {
            return Change::FullReload(ReloadReason::Topology);
        }

        let certificates = changed_certificates(before, next);
        if !certificates.is_empty() && !self.hot_certificate_swap {
            return Change::FullReload(ReloadReason::CertificateContent);
        }

        let changes = DynamicChanges {
            backends: changed_backends(before, next),
            certificates,
        };
        if changes.is_empty() {
            return Change::FullReload(ReloadReason::Topology);
        }
        Change::DynamicUpdate(changes)
    }
}

/// Backends whose endpoint set differs. Identities are equal at this point.
fn changed_backends(before: &RoutingModel, next: &RoutingModel) -> Vec<Backend> {
    next.backends
        .iter()
        .filter(|backend| {
            before
                .backend(&backend.name)
                .map_or(true, |old| old.endpoints != backend.endpoints)
        })
        .cloned()
        .collect()
}

fn changed_certificates(before: &RoutingModel, next: &RoutingModel) -> Vec<Certificate> {
    next.certificates
        .iter()
        .filter(|cert| {
            before.certificate(&cert.source).map_or(true, |old| {
                old.fingerprint != cert.fingerprint || old.key_pem != cert.key_pem
            })
        })
        .cloned()
        .collect()
}
