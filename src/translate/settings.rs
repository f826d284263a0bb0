//! Global settings read from the controller ConfigMap.

use k8s_openapi::api::core::v1::ConfigMap;

use crate::model::ProxySettings;
use crate::store::{ObjectKey, ResourceKind};
use crate::translate::defects::{DefectKind, Defects};

/// Overlay recognized keys onto the defaults. Unknown keys are ignored.
pub fn parse_settings(key: &ObjectKey, config_map: &ConfigMap, defects: &mut Defects) -> ProxySettings {
    let mut settings = ProxySettings::default();
    let Some(data) = config_map.data.as_ref() else {
        return settings;
    };

    for (name, raw) in data {
        let value = raw.trim();
        let result = match name.as_str() {
            "ssl-redirect" => parse_bool(value).map(|v| settings.ssl_redirect = v),
            "hsts" => parse_bool(value).map(|v| settings.hsts = v),
            "proxy-connect-timeout" => {
                parse_positive(value).map(|v| settings.connect_timeout_secs = v)
            }
            "proxy-read-timeout" => parse_positive(value).map(|v| settings.read_timeout_secs = v),
            "load-balance" => value.parse().map(|v| settings.load_balance = v),
            "worker-processes" => match value {
                "auto" => {
                    settings.worker_processes = None;
                    Ok(())
                }
                _ => parse_positive(value)
                    .and_then(|v| u32::try_from(v).map_err(|_| "value too large".to_string()))
                    .map(|v| settings.worker_processes = Some(v)),
            },
            "keep-alive-requests" => parse_positive(value)
                .and_then(|v| u32::try_from(v).map_err(|_| "value too large".to_string()))
                .map(|v| settings.keep_alive_requests = v),
            _ => Ok(()),
        };

        if let Err(reason) = result {
            defects.record(
                DefectKind::InvalidSetting,
                Some((ResourceKind::ConfigMap, key)),
                format!("{}: {}", name, reason),
            );
        }
    }

    settings
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

fn parse_positive(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(0) => Err("must be greater than zero".into()),
        Ok(v) => Ok(v),
        Err(_) => Err(format!("'{}' is not a positive integer", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoadBalancePolicy;
    use std::collections::BTreeMap;

    fn config_map(pairs: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_overlay() {
        let mut defects = Defects::default();
        let settings = parse_settings(
            &ObjectKey::new("ingress", "settings"),
            &config_map(&[
                ("ssl-redirect", "false"),
                ("load-balance", "least_conn"),
                ("worker-processes", "4"),
                ("unrelated", "whatever"),
            ]),
            &mut defects,
        );
        assert!(!settings.ssl_redirect);
        assert_eq!(settings.load_balance, LoadBalancePolicy::LeastConn);
        assert_eq!(settings.worker_processes, Some(4));
        assert_eq!(settings.read_timeout_secs, 60);
        assert!(defects.into_sorted().is_empty());
    }

    #[test]
    fn test_bad_value_keeps_default() {
        let mut defects = Defects::default();
        let settings = parse_settings(
            &ObjectKey::new("ingress", "settings"),
            &config_map(&[("proxy-read-timeout", "soon"), ("keep-alive-requests", "0")]),
            &mut defects,
        );
        assert_eq!(settings, ProxySettings::default());

        let defects = defects.into_sorted();
        assert_eq!(defects.len(), 2);
        assert!(defects.iter().all(|d| d.kind == DefectKind::InvalidSetting));
    }
}
