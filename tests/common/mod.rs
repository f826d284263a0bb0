//! Shared fixtures and fake proxy collaborators for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::watcher;
use tempfile::TempDir;
use tokio::sync::watch;

use ingress_sync::apply::{ControlError, ProcessError, ProxyControl, ProxyProcess};
use ingress_sync::config::ControllerConfig;
use ingress_sync::model::{Backend, Certificate};
use ingress_sync::store::{Store, StoreWriter, StoredResource};
use ingress_sync::sync::Reconciler;
use ingress_sync::translate::backends::SERVICE_NAME_LABEL;
use ingress_sync::translate::TranslateOptions;

pub fn mk_meta(name: &str, revision: u32) -> ObjectMeta {
    ObjectMeta {
        namespace: Some("default".into()),
        name: Some(name.into()),
        resource_version: Some(revision.to_string()),
        ..Default::default()
    }
}

/// An Ingress with one Prefix path per `(host, path, service)` rule.
pub fn mk_ingress(name: &str, rules: &[(&str, &str, &str)]) -> Ingress {
    let rules = rules
        .iter()
        .map(|(host, path, service)| IngressRule {
            host: Some(host.to_string()).filter(|h| !h.is_empty()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(path.to_string()),
                    path_type: "Prefix".into(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: service.to_string(),
                            port: Some(ServiceBackendPort {
                                number: Some(80),
                                name: None,
                            }),
                        }),
                        resource: None,
                    },
                }],
            }),
        })
        .collect();

    Ingress {
        metadata: mk_meta(name, 1),
        spec: Some(IngressSpec {
            ingress_class_name: Some("ingress-sync".into()),
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn with_tls(mut ingress: Ingress, host: &str, secret: &str) -> Ingress {
    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls = Some(vec![IngressTLS {
            hosts: Some(vec![host.to_string()]),
            secret_name: Some(secret.to_string()),
        }]);
    }
    ingress
}

pub fn with_annotations(mut ingress: Ingress, pairs: &[(&str, &str)]) -> Ingress {
    let annotations = ingress.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (name, value) in pairs {
        annotations.insert(format!("ingress-sync.io/{}", name), value.to_string());
    }
    ingress
}

pub fn mk_service(name: &str) -> Service {
    Service {
        metadata: mk_meta(name, 1),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An EndpointSlice of ready endpoints on port 8080.
pub fn mk_slice(name: &str, service: &str, revision: u32, addresses: &[&str]) -> EndpointSlice {
    let mut metadata = mk_meta(name, revision);
    metadata.labels = Some(BTreeMap::from([(
        SERVICE_NAME_LABEL.to_string(),
        service.to_string(),
    )]));

    EndpointSlice {
        metadata,
        address_type: "IPv4".into(),
        endpoints: addresses
            .iter()
            .map(|address| Endpoint {
                addresses: vec![address.to_string()],
                conditions: Some(EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![EndpointPort {
            name: Some("http".into()),
            port: Some(8080),
            ..Default::default()
        }]),
    }
}

/// A self-signed TLS secret. With `matching_key` false the key belongs to a
/// different key pair.
pub fn mk_tls_secret(name: &str, revision: u32, hosts: &[&str], matching_key: bool) -> Secret {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>())
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let key_pem = if matching_key {
        key.serialize_pem()
    } else {
        rcgen::KeyPair::generate().unwrap().serialize_pem()
    };

    Secret {
        metadata: mk_meta(name, revision),
        type_: Some("kubernetes.io/tls".into()),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(cert.pem().into_bytes())),
            ("tls.key".to_string(), ByteString(key_pem.into_bytes())),
        ])),
        ..Default::default()
    }
}

/// Records every push; fails on demand.
#[derive(Default)]
pub struct FakeControl {
    pub fail: AtomicBool,
    pub certificate_swap: bool,
    pub backend_pushes: Mutex<Vec<Vec<Backend>>>,
    pub certificate_pushes: Mutex<Vec<Vec<Certificate>>>,
}

impl FakeControl {
    pub fn backend_pushes(&self) -> Vec<Vec<Backend>> {
        self.backend_pushes.lock().unwrap().clone()
    }

    pub fn certificate_pushes(&self) -> usize {
        self.certificate_pushes.lock().unwrap().len()
    }
}

#[async_trait]
impl ProxyControl for FakeControl {
    async fn push_backends(&self, backends: &[Backend]) -> Result<(), ControlError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ControlError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.backend_pushes.lock().unwrap().push(backends.to_vec());
        Ok(())
    }

    async fn push_certificates(&self, certificates: &[Certificate]) -> Result<(), ControlError> {
        if !self.certificate_swap {
            return Err(ControlError::Unsupported);
        }
        self.certificate_pushes
            .lock()
            .unwrap()
            .push(certificates.to_vec());
        Ok(())
    }

    fn supports_certificate_swap(&self) -> bool {
        self.certificate_swap
    }
}

/// Counts validations and reloads; rejects or fails on demand.
#[derive(Default)]
pub struct FakeProcess {
    pub reject: AtomicBool,
    pub fail_reload: AtomicBool,
    pub validations: AtomicU32,
    pub reloads: AtomicU32,
}

impl FakeProcess {
    pub fn reloads(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> u32 {
        self.validations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyProcess for FakeProcess {
    async fn validate(&self, candidate: &Path) -> Result<(), ProcessError> {
        assert!(candidate.exists(), "candidate must be written before validation");
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(ProcessError::Failed {
                program: "proxy".into(),
                status: "exit status: 1".into(),
                output: "configuration test failed".into(),
            });
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProcessError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(ProcessError::NotConfigured("reload"));
        }
        Ok(())
    }
}

/// Controller configuration writing into `dir` with no reload settle time.
pub fn test_config(dir: &Path) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.proxy.config_path = dir.join("proxy.conf");
    config.proxy.ssl_dir = dir.join("ssl");
    config.proxy.reload_settle_ms = 0;
    config.proxy.reload_retries = 2;
    config.sync.debounce_ms = 20;
    config.sync.min_interval_ms = 0;
    config.sync.backoff_base_ms = 100;
    config.sync.backoff_max_ms = 1000;
    config
}

/// A reconciler wired to fakes and a store the test writes directly.
pub struct Harness {
    pub dir: TempDir,
    pub store: Store,
    pub writer: StoreWriter,
    pub control: Arc<FakeControl>,
    pub process: Arc<FakeProcess>,
    pub reconciler: Reconciler,
    pub options: watch::Sender<TranslateOptions>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeControl::default(), |_| {})
    }

    pub fn with(control: FakeControl, configure: impl FnOnce(&mut ControllerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);

        let (store, writer) = Store::new();
        let (options, options_rx) = watch::channel(TranslateOptions::from_config(&config.ingress));
        let control = Arc::new(control);
        let process = Arc::new(FakeProcess::default());
        let reconciler = Reconciler::new(
            store.clone(),
            options_rx,
            &config,
            control.clone(),
            process.clone(),
        );

        Self {
            dir,
            store,
            writer,
            control,
            process,
            reconciler,
            options,
        }
    }

    pub fn upsert<K: StoredResource>(&mut self, object: K) {
        self.writer.apply(watcher::Event::Apply(object));
    }

    pub fn delete<K: StoredResource>(&mut self, object: K) {
        self.writer.apply(watcher::Event::Delete(object));
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("proxy.conf")
    }

    pub fn live_config(&self) -> String {
        std::fs::read_to_string(self.config_path()).unwrap_or_default()
    }

    /// File name and contents of every file in the certificate directory.
    pub fn ssl_files(&self) -> BTreeMap<String, String> {
        let Ok(entries) = std::fs::read_dir(self.dir.path().join("ssl")) else {
            return BTreeMap::new();
        };
        entries
            .map(|entry| entry.unwrap().path())
            .map(|path| {
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                (name, std::fs::read_to_string(&path).unwrap())
            })
            .collect()
    }
}
