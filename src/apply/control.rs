//! Local control channel to the running proxy.
//!
//! # Responsibilities
//! - Push backend endpoint sets without a reload
//! - Push renewed certificates when the proxy supports hot swapping
//!
//! # Design Decisions
//! - The channel only ever talks to a loopback address
//! - Every push carries the complete state of the named items, so a
//!   repeated push is harmless

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::{is_loopback_url, ProxyConfig};
use crate::model::{Backend, Certificate};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control URL {0} is not a loopback address")]
    NotLoopback(String),

    #[error("invalid control URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("control request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("proxy rejected update with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("certificate hot swap is not supported")]
    Unsupported,
}

/// Side channel used for changes that do not need a reload.
#[async_trait]
pub trait ProxyControl: Send + Sync {
    async fn push_backends(&self, backends: &[Backend]) -> Result<(), ControlError>;

    async fn push_certificates(&self, certificates: &[Certificate]) -> Result<(), ControlError>;

    fn supports_certificate_swap(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct EndpointPayload<'a> {
    address: &'a str,
    port: u16,
    weight: u32,
    health: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct BackendPayload<'a> {
    name: &'a str,
    protocol: &'static str,
    policy: &'static str,
    endpoints: Vec<EndpointPayload<'a>>,
}

impl<'a> From<&'a Backend> for BackendPayload<'a> {
    fn from(backend: &'a Backend) -> Self {
        Self {
            name: &backend.name,
            protocol: backend.protocol.as_str(),
            policy: backend.policy.as_str(),
            endpoints: backend
                .endpoints
                .iter()
                .map(|e| EndpointPayload {
                    address: &e.address,
                    port: e.port,
                    weight: e.weight,
                    health: e.health.as_str(),
                    zone: e.zone.as_deref(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CertificatePayload<'a> {
    source: String,
    server_names: &'a [String],
    certificate: &'a str,
    key: &'a str,
    fingerprint: &'a str,
}

impl<'a> From<&'a Certificate> for CertificatePayload<'a> {
    fn from(cert: &'a Certificate) -> Self {
        Self {
            source: cert.source.to_string(),
            server_names: &cert.server_names,
            certificate: &cert.certificate_pem,
            key: &cert.key_pem,
            fingerprint: &cert.fingerprint,
        }
    }
}

/// JSON-over-HTTP control channel.
#[derive(Debug, Clone)]
pub struct HttpControlChannel {
    client: reqwest::Client,
    base: Url,
    certificate_swap: bool,
}

impl HttpControlChannel {
    pub fn new(
        base: Url,
        timeout: Duration,
        certificate_swap: bool,
    ) -> Result<Self, ControlError> {
        if !is_loopback_url(&base) {
            return Err(ControlError::NotLoopback(base.to_string()));
        }

        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base,
            certificate_swap,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ControlError> {
        let base = Url::parse(&config.control_url)?;
        Self::new(
            base,
            Duration::from_millis(config.control_timeout_ms),
            config.hot_certificate_swap,
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), ControlError> {
        let url = self.base.join(path)?;
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ControlError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ProxyControl for HttpControlChannel {
    async fn push_backends(&self, backends: &[Backend]) -> Result<(), ControlError> {
        let payload: Vec<BackendPayload<'_>> = backends.iter().map(BackendPayload::from).collect();
        self.post("configuration/backends", &payload).await
    }

    async fn push_certificates(&self, certificates: &[Certificate]) -> Result<(), ControlError> {
        if !self.certificate_swap {
            return Err(ControlError::Unsupported);
        }
        let payload: Vec<CertificatePayload<'_>> =
            certificates.iter().map(CertificatePayload::from).collect();
        self.post("configuration/certificates", &payload).await
    }

    fn supports_certificate_swap(&self) -> bool {
        self.certificate_swap
    }
}
