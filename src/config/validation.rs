//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check object references (`namespace/name`)
//! - Validate value ranges (timeouts > 0, capacities > 0)
//! - Keep the control channel on loopback
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControllerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::{Host, Url};

use crate::config::schema::ControllerConfig;
use crate::store::ObjectKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} '{value}' is not a namespace/name reference")]
    InvalidReference { field: &'static str, value: String },

    #[error("{field} '{value}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// True when the URL targets the local host only.
pub fn is_loopback_url(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

pub fn validate_config(config: &ControllerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let ingress = &config.ingress;
    if ingress.class.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "ingress.class",
        });
    }
    if !ingress.annotation_prefix.ends_with('/') {
        errors.push(ValidationError::InvalidValue {
            field: "ingress.annotation_prefix",
            value: ingress.annotation_prefix.clone(),
            reason: "must end with '/'".to_string(),
        });
    }
    for (field, value) in [
        ("ingress.configmap", &ingress.configmap),
        ("ingress.default_ssl_certificate", &ingress.default_ssl_certificate),
    ] {
        if let Some(value) = value {
            if ObjectKey::parse(value).is_none() {
                errors.push(ValidationError::InvalidReference {
                    field,
                    value: value.clone(),
                });
            }
        }
    }

    let sync = &config.sync;
    if sync.queue_capacity == 0 {
        errors.push(ValidationError::Zero {
            field: "sync.queue_capacity",
        });
    }
    if sync.backoff_base_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "sync.backoff_base_ms",
        });
    }
    if sync.backoff_max_ms < sync.backoff_base_ms {
        errors.push(ValidationError::InvalidValue {
            field: "sync.backoff_max_ms",
            value: sync.backoff_max_ms.to_string(),
            reason: "must not be lower than sync.backoff_base_ms".to_string(),
        });
    }

    let proxy = &config.proxy;
    if proxy.reload_command.is_empty() {
        errors.push(ValidationError::Empty {
            field: "proxy.reload_command",
        });
    }
    if proxy.command_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "proxy.command_timeout_secs",
        });
    }
    if proxy.reload_retries == 0 {
        errors.push(ValidationError::Zero {
            field: "proxy.reload_retries",
        });
    }
    if proxy.control_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "proxy.control_timeout_ms",
        });
    }
    if proxy.config_path.as_os_str().is_empty() {
        errors.push(ValidationError::Empty {
            field: "proxy.config_path",
        });
    }
    match Url::parse(&proxy.control_url) {
        Ok(url) if is_loopback_url(&url) => {}
        Ok(_) => errors.push(ValidationError::InvalidValue {
            field: "proxy.control_url",
            value: proxy.control_url.clone(),
            reason: "control channel must be on loopback".to_string(),
        }),
        Err(e) => errors.push(ValidationError::InvalidValue {
            field: "proxy.control_url",
            value: proxy.control_url.clone(),
            reason: e.to_string(),
        }),
    }

    let observability = &config.observability;
    if observability.metrics_enabled {
        if let Err(e) = observability.metrics_address.parse::<SocketAddr>() {
            errors.push(ValidationError::InvalidValue {
                field: "observability.metrics_address",
                value: observability.metrics_address.clone(),
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
