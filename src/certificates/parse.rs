//! PEM and X.509 decoding for TLS secrets.

use std::io::BufReader;

use rcgen::KeyPair;
use rustls_pemfile::Item;
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::certificates::CertificateError;

/// The usable content of a TLS secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    /// DNS names from the SAN extension, or the subject CN when there are none.
    pub server_names: Vec<String>,
    pub certificate_pem: String,
    pub key_pem: String,
    /// SHA-256 of the leaf certificate DER, hex encoded.
    pub fingerprint: String,
    pub not_before: i64,
    pub not_after: i64,
}

impl std::fmt::Debug for ParsedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedCertificate")
            .field("server_names", &self.server_names)
            .field("fingerprint", &self.fingerprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode a certificate chain and its private key, and check that they belong
/// together.
pub fn parse_key_pair(cert_pem: &[u8], key_pem: &[u8]) -> Result<ParsedCertificate, CertificateError> {
    let mut chain = Vec::new();
    for item in rustls_pemfile::certs(&mut BufReader::new(cert_pem)) {
        chain.push(item.map_err(|e| CertificateError::Pem(e.to_string()))?);
    }
    let leaf_der = chain.first().ok_or(CertificateError::NoCertificate)?;

    let key_der = read_pkcs8_key(key_pem)?;

    let (_, leaf) = X509Certificate::from_der(leaf_der.as_ref())
        .map_err(|e| CertificateError::X509(e.to_string()))?;

    let key_pair = KeyPair::try_from(key_der.as_slice())
        .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;
    if key_pair.public_key_raw() != leaf.public_key().subject_public_key.data.as_ref() {
        return Err(CertificateError::KeyMismatch);
    }

    let server_names = server_names(&leaf)?;
    let validity = leaf.validity();

    Ok(ParsedCertificate {
        server_names,
        certificate_pem: String::from_utf8_lossy(cert_pem).into_owned(),
        key_pem: String::from_utf8_lossy(key_pem).into_owned(),
        fingerprint: sha256_hex(leaf_der.as_ref()),
        not_before: validity.not_before.timestamp(),
        not_after: validity.not_after.timestamp(),
    })
}

fn read_pkcs8_key(key_pem: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let mut reader = BufReader::new(key_pem);
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::Pkcs8Key(key))) => return Ok(key.secret_pkcs8_der().to_vec()),
            Ok(Some(Item::Pkcs1Key(_))) => {
                return Err(CertificateError::UnsupportedKey(
                    "PKCS#1 RSA keys are not supported, convert to PKCS#8".into(),
                ))
            }
            Ok(Some(Item::Sec1Key(_))) => {
                return Err(CertificateError::UnsupportedKey(
                    "SEC1 EC keys are not supported, convert to PKCS#8".into(),
                ))
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(CertificateError::NoKey),
            Err(e) => return Err(CertificateError::Pem(e.to_string())),
        }
    }
}

fn server_names(leaf: &X509Certificate<'_>) -> Result<Vec<String>, CertificateError> {
    let mut names = Vec::new();

    let san = leaf
        .subject_alternative_name()
        .map_err(|e| CertificateError::X509(e.to_string()))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(dns.to_lowercase());
            }
        }
    }

    if names.is_empty() {
        if let Some(cn) = leaf.subject().iter_common_name().next() {
            if let Ok(cn) = cn.as_str() {
                names.push(cn.to_lowercase());
            }
        }
    }

    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType};

    fn self_signed(names: &[&str]) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_parse_matching_pair() {
        let (cert, key) = self_signed(&["example.com", "*.Example.com"]);
        let parsed = parse_key_pair(cert.as_bytes(), key.as_bytes()).unwrap();

        assert_eq!(parsed.server_names, vec!["*.example.com", "example.com"]);
        assert_eq!(parsed.fingerprint.len(), 64);
        assert!(parsed.not_before < parsed.not_after);
    }

    #[test]
    fn test_common_name_fallback() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "legacy.example.com");
        let cert = params.self_signed(&key).unwrap();

        let parsed = parse_key_pair(cert.pem().as_bytes(), key.serialize_pem().as_bytes()).unwrap();
        assert_eq!(parsed.server_names, vec!["legacy.example.com"]);
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let (cert, _) = self_signed(&["example.com"]);
        let (_, other_key) = self_signed(&["example.com"]);

        let err = parse_key_pair(cert.as_bytes(), other_key.as_bytes()).unwrap_err();
        assert_eq!(err, CertificateError::KeyMismatch);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let (_, key) = self_signed(&["example.com"]);
        let err = parse_key_pair(b"not a certificate", key.as_bytes()).unwrap_err();
        assert_eq!(err, CertificateError::NoCertificate);

        let (cert, _) = self_signed(&["example.com"]);
        let err = parse_key_pair(cert.as_bytes(), b"").unwrap_err();
        assert_eq!(err, CertificateError::NoKey);
    }
}
