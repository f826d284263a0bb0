//! Parse cache and expiry tracking for TLS secrets.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;

use crate::certificates::parse::{parse_key_pair, sha256_hex, ParsedCertificate};
use crate::certificates::CertificateError;
use crate::model::{CertificateStatus, RoutingModel};
use crate::observability::metrics;
use crate::store::{ObjectKey, Snapshot};

const TLS_CERT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

type ParseResult = Result<Arc<ParsedCertificate>, CertificateError>;

#[derive(Debug)]
pub struct CertificateManager {
    expiry_warning_secs: i64,
    cache: DashMap<(ObjectKey, String), ParseResult>,
    reported: DashMap<ObjectKey, CertificateStatus>,
}

impl CertificateManager {
    pub fn new(expiry_warning_secs: i64) -> Self {
        Self {
            expiry_warning_secs,
            cache: DashMap::new(),
            reported: DashMap::new(),
        }
    }

    /// Decode a TLS secret, reusing an earlier result for identical content.
    pub fn resolve(&self, key: &ObjectKey, secret: &Secret) -> ParseResult {
        let cert = secret_entry(secret, TLS_CERT).ok_or(CertificateError::MissingData(TLS_CERT))?;
        let tls_key = secret_entry(secret, TLS_KEY).ok_or(CertificateError::MissingData(TLS_KEY))?;

        let digest = content_digest(&cert, &tls_key);
        let cache_key = (key.clone(), digest);
        if let Some(hit) = self.cache.get(&cache_key) {
            return hit.value().clone();
        }

        let result = parse_key_pair(&cert, &tls_key).map(Arc::new);
        if let Err(e) = &result {
            tracing::debug!(secret = %key, error = %e, "TLS secret rejected");
        }
        self.cache.insert(cache_key, result.clone());
        result
    }

    /// Classify a certificate's validity window at `now` (unix seconds).
    pub fn status(&self, parsed: &ParsedCertificate, now: i64) -> CertificateStatus {
        if now < parsed.not_before {
            CertificateStatus::NotYetValid
        } else if now >= parsed.not_after {
            CertificateStatus::Expired
        } else if parsed.not_after - now <= self.expiry_warning_secs {
            CertificateStatus::ExpiringSoon
        } else {
            CertificateStatus::Valid
        }
    }

    /// Report certificate status changes for an applied model.
    ///
    /// Each transition is logged once; the expiry gauge is refreshed on
    /// every call.
    pub fn observe(&self, model: &RoutingModel, now: i64) {
        let mut seen = HashSet::new();

        for cert in &model.certificates {
            seen.insert(cert.source.clone());
            metrics::record_certificate_expiry(&cert.source, cert.not_after - now);

            let previous = self.reported.insert(cert.source.clone(), cert.status);
            if previous == Some(cert.status) {
                continue;
            }

            if cert.status.is_degraded() {
                tracing::warn!(
                    secret = %cert.source,
                    status = cert.status.as_str(),
                    not_after = cert.not_after,
                    "Serving degraded certificate"
                );
            } else if previous.is_some() {
                tracing::info!(secret = %cert.source, "Certificate is valid again");
            }
        }

        self.reported.retain(|source, _| seen.contains(source));
    }

    /// Drop cached results for secrets no longer present or since changed.
    pub fn prune(&self, snapshot: &Snapshot) {
        let live: HashSet<(ObjectKey, String)> = snapshot
            .list::<Secret>()
            .filter_map(|(key, secret)| {
                let cert = secret_entry(secret, TLS_CERT)?;
                let tls_key = secret_entry(secret, TLS_KEY)?;
                Some((key.clone(), content_digest(&cert, &tls_key)))
            })
            .collect();
        self.cache.retain(|entry, _| live.contains(entry));
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn secret_entry(secret: &Secret, name: &str) -> Option<Vec<u8>> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(name)) {
        return Some(bytes.0.clone());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(name))
        .map(|s| s.as_bytes().to_vec())
}

fn content_digest(cert: &[u8], key: &[u8]) -> String {
    let mut content = Vec::with_capacity(cert.len() + key.len() + 1);
    content.extend_from_slice(cert);
    content.push(0);
    content.extend_from_slice(key);
    sha256_hex(&content)
}
