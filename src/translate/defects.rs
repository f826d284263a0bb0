//! Problems found while translating, reported instead of failing the pass.

use std::fmt;

use serde::Serialize;

use crate::store::{ObjectKey, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// The object cannot be translated at all and was skipped.
    MalformedObject,
    InvalidAnnotation,
    /// A backend reference points at a missing service or port.
    UnresolvedBackend,
    /// A rule duplicates one owned by another Ingress.
    RuleConflict,
    /// Ingresses sharing a backend disagree on its settings.
    ConflictingAnnotation,
    InvalidCertificate,
    CertificateMismatch,
    MissingCertificate,
    InvalidSetting,
    OrphanCanary,
}

impl DefectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectKind::MalformedObject => "malformed_object",
            DefectKind::InvalidAnnotation => "invalid_annotation",
            DefectKind::UnresolvedBackend => "unresolved_backend",
            DefectKind::RuleConflict => "rule_conflict",
            DefectKind::ConflictingAnnotation => "conflicting_annotation",
            DefectKind::InvalidCertificate => "invalid_certificate",
            DefectKind::CertificateMismatch => "certificate_mismatch",
            DefectKind::MissingCertificate => "missing_certificate",
            DefectKind::InvalidSetting => "invalid_setting",
            DefectKind::OrphanCanary => "orphan_canary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Defect {
    pub kind: DefectKind,
    pub object: Option<ObjectRef>,
    pub message: String,
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object {
            Some(object) => write!(
                f,
                "{} {} {}: {}",
                self.kind.as_str(),
                object.kind,
                object.key,
                self.message
            ),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

/// Accumulates defects during one translation pass.
#[derive(Debug, Default)]
pub struct Defects(Vec<Defect>);

impl Defects {
    pub fn record(
        &mut self,
        kind: DefectKind,
        object: Option<(ResourceKind, &ObjectKey)>,
        message: impl Into<String>,
    ) {
        self.0.push(Defect {
            kind,
            object: object.map(|(kind, key)| ObjectRef {
                kind,
                key: key.clone(),
            }),
            message: message.into(),
        });
    }

    pub fn ingress(&mut self, kind: DefectKind, key: &ObjectKey, message: impl Into<String>) {
        self.record(kind, Some((ResourceKind::Ingress, key)), message);
    }

    pub fn secret(&mut self, kind: DefectKind, key: &ObjectKey, message: impl Into<String>) {
        self.record(kind, Some((ResourceKind::Secret, key)), message);
    }

    /// Sorted and de-duplicated, so equal inputs yield equal reports.
    pub fn into_sorted(mut self) -> Vec<Defect> {
        self.0.sort();
        self.0.dedup();
        self.0
    }
}
