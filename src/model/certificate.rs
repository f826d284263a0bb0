//! TLS material bound to servers.

use std::fmt;

use crate::store::ObjectKey;

/// Validity of a certificate at translation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateStatus {
    Valid,
    ExpiringSoon,
    Expired,
    NotYetValid,
}

impl CertificateStatus {
    /// Degraded certificates are still served.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, CertificateStatus::Valid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Valid => "valid",
            CertificateStatus::ExpiringSoon => "expiring_soon",
            CertificateStatus::Expired => "expired",
            CertificateStatus::NotYetValid => "not_yet_valid",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The TLS secret this certificate was read from.
    pub source: ObjectKey,
    pub server_names: Vec<String>,
    pub certificate_pem: String,
    pub key_pem: String,
    /// SHA-256 of the leaf certificate, hex encoded.
    pub fingerprint: String,
    pub not_before: i64,
    pub not_after: i64,
    pub status: CertificateStatus,
    pub created_at: i64,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("source", &self.source)
            .field("server_names", &self.server_names)
            .field("fingerprint", &self.fingerprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("status", &self.status)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
