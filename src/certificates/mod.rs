//! Certificate Manager
//!
//! # Responsibilities
//! - Decode TLS secrets and verify that key and certificate belong together
//! - Classify certificates by validity window
//! - Report expiry transitions to logs and metrics
//!
//! # Data Flow
//! ```text
//! Secret (tls.crt, tls.key)
//!     → parse.rs (PEM, X.509, key match)
//!     → manager.rs cache (secret key + content digest)
//!     → Certificate in the RoutingModel (with status)
//!     → observe() after each pass (transitions, expiry gauge)
//! ```
//!
//! # Design Decisions
//! - Expired and not-yet-valid certificates stay in the model, flagged
//! - Mismatched or undecodable material is excluded from the model
//! - Parsing is cached; a cache hit returns exactly what a fresh parse would

pub mod manager;
pub mod parse;

pub use manager::CertificateManager;
pub use parse::{parse_key_pair, ParsedCertificate};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("secret has no '{0}' entry")]
    MissingData(&'static str),

    #[error("no certificate found in PEM data")]
    NoCertificate,

    #[error("no private key found in PEM data")]
    NoKey,

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("private key does not match certificate")]
    KeyMismatch,
}
