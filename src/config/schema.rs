//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! controller. All types derive Serde traits for deserialization from config
//! files, and every section has defaults so an empty file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the controller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Which Ingresses to handle and how to read them.
    pub ingress: IngressConfig,

    /// Debounce and backoff for the sync loop.
    pub sync: SyncConfig,

    /// The supervised proxy: files, commands and control channel.
    pub proxy: ProxyConfig,

    /// Certificate expiry reporting.
    pub certificates: CertificatesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Ingress class handled by this controller.
    pub class: String,

    /// Also handle Ingresses without any class.
    pub watch_without_class: bool,

    /// Prefix of behavior annotations.
    pub annotation_prefix: String,

    /// `namespace/name` of the global settings ConfigMap.
    pub configmap: Option<String>,

    /// `namespace/name` of the fallback TLS secret.
    pub default_ssl_certificate: Option<String>,

    /// Restrict watches to one namespace.
    pub namespace: Option<String>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            class: "ingress-sync".to_string(),
            watch_without_class: false,
            annotation_prefix: "ingress-sync.io/".to_string(),
            configmap: None,
            default_ssl_certificate: None,
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period collected after the first event of a burst.
    pub debounce_ms: u64,

    /// Minimum time between the starts of two reconciliations.
    pub min_interval_ms: u64,

    /// First retry delay after a failed apply.
    pub backoff_base_ms: u64,

    /// Retry delay cap.
    pub backoff_max_ms: u64,

    /// Capacity of the request channel between ingestion and the sync loop.
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            min_interval_ms: 1000,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Live configuration file read by the proxy.
    pub config_path: PathBuf,

    /// Directory for certificate files referenced by the configuration.
    pub ssl_dir: PathBuf,

    /// Dry-run command; `{config}` is replaced by the candidate path.
    pub test_command: Vec<String>,

    /// Command asking the proxy to reload gracefully.
    pub reload_command: Vec<String>,

    /// Deadline for each command.
    pub command_timeout_secs: u64,

    /// Attempts for a failing reload before reporting degraded state.
    pub reload_retries: u32,

    /// Time the proxy needs to finish a reload before the next one.
    pub reload_settle_ms: u64,

    /// Loopback base URL of the proxy's control side-channel.
    pub control_url: String,

    /// Deadline for each side-channel call.
    pub control_timeout_ms: u64,

    /// The proxy can replace certificates without a reload.
    pub hot_certificate_swap: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/ingress-sync/proxy.conf"),
            ssl_dir: PathBuf::from("/etc/ingress-sync/ssl"),
            test_command: vec![
                "nginx".to_string(),
                "-t".to_string(),
                "-c".to_string(),
                "{config}".to_string(),
            ],
            reload_command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
            command_timeout_secs: 30,
            reload_retries: 3,
            reload_settle_ms: 2000,
            control_url: "http://127.0.0.1:10246".to_string(),
            control_timeout_ms: 3000,
            hot_certificate_swap: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Certificates expiring within this many days are flagged.
    pub expiry_warning_days: u32,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a filter directive.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
