//! Deterministic serialization of a routing model.
//!
//! The same model always renders to byte-identical text, so the text digest
//! doubles as the model fingerprint.
//!
//! Certificate files are content-addressed: a renewed certificate gets a new
//! path, and the file the running configuration points at is never rewritten.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::certificates::parse::sha256_hex;
use crate::model::{
    Backend, Certificate, Fingerprint, ProxySettings, RoutingModel, RoutingRule, Server,
};
use crate::store::ObjectKey;

/// Digest characters kept in a certificate file name.
const FILE_DIGEST_LEN: usize = 16;

/// A certificate and key written next to the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFile {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub text: String,
    pub certificate_files: Vec<CertificateFile>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct Renderer {
    ssl_dir: PathBuf,
}

impl Renderer {
    pub fn new(ssl_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssl_dir: ssl_dir.into(),
        }
    }

    pub fn ssl_dir(&self) -> &Path {
        &self.ssl_dir
    }

    /// Where the combined PEM of `cert` is written.
    pub fn certificate_path(&self, cert: &Certificate) -> PathBuf {
        let digest = sha256_hex(certificate_contents(cert).as_bytes());
        certificate_path(&self.ssl_dir, &cert.source, &digest)
    }

    pub fn render(&self, model: &RoutingModel) -> RenderedConfig {
        let mut text = String::from("# generated by ingress-sync, do not edit\n\n");

        render_settings(&mut text, &model.settings);
        for backend in &model.backends {
            render_backend(&mut text, backend);
        }

        let mut certificate_files = Vec::with_capacity(model.certificates.len());
        for cert in &model.certificates {
            certificate_files.push(CertificateFile {
                path: self.certificate_path(cert),
                contents: certificate_contents(cert),
            });
        }

        for server in &model.servers {
            let certificate = server
                .certificate
                .as_ref()
                .and_then(|source| model.certificate(source));
            self.render_server(&mut text, server, certificate, &model.settings);
        }

        let fingerprint = Fingerprint(sha256_hex(text.as_bytes()));
        RenderedConfig {
            text,
            certificate_files,
            fingerprint,
        }
    }

    fn render_server(
        &self,
        out: &mut String,
        server: &Server,
        certificate: Option<&Certificate>,
        settings: &ProxySettings,
    ) {
        let _ = writeln!(out, "server {} {{", server.hostname);
        if let Some(cert) = certificate {
            let _ = writeln!(out, "  certificate {};", self.certificate_path(cert).display());
        }
        for rule in &server.rules {
            render_rule(out, rule, certificate.is_some() && settings.ssl_redirect);
        }
        out.push_str("}\n\n");
    }
}

fn certificate_path(dir: &Path, source: &ObjectKey, digest: &str) -> PathBuf {
    let digest = &digest[..digest.len().min(FILE_DIGEST_LEN)];
    dir.join(format!("{}-{}-{}.pem", source.namespace, source.name, digest))
}

fn certificate_contents(cert: &Certificate) -> String {
    let mut contents = cert.certificate_pem.trim_end().to_string();
    contents.push('\n');
    contents.push_str(cert.key_pem.trim_end());
    contents.push('\n');
    contents
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn render_settings(out: &mut String, settings: &ProxySettings) {
    out.push_str("settings {\n");
    match settings.worker_processes {
        Some(n) => {
            let _ = writeln!(out, "  worker_processes {};", n);
        }
        None => out.push_str("  worker_processes auto;\n"),
    }
    let _ = writeln!(out, "  keep_alive_requests {};", settings.keep_alive_requests);
    let _ = writeln!(out, "  ssl_redirect {};", on_off(settings.ssl_redirect));
    let _ = writeln!(out, "  hsts {};", on_off(settings.hsts));
    let _ = writeln!(out, "  proxy_connect_timeout {}s;", settings.connect_timeout_secs);
    let _ = writeln!(out, "  proxy_read_timeout {}s;", settings.read_timeout_secs);
    out.push_str("}\n\n");
}

fn render_backend(out: &mut String, backend: &Backend) {
    let _ = writeln!(out, "upstream {} {{", backend.name);
    let _ = writeln!(out, "  service {} port {};", backend.service, backend.port);
    let _ = writeln!(out, "  protocol {};", backend.protocol.as_str());
    let _ = writeln!(out, "  balance {};", backend.policy.as_str());
    let check = &backend.health_check;
    if check.path.is_some() || check.interval_secs.is_some() {
        out.push_str("  health_check");
        if let Some(path) = &check.path {
            let _ = write!(out, " path={}", path);
        }
        if let Some(interval) = check.interval_secs {
            let _ = write!(out, " interval={}s", interval);
        }
        out.push_str(";\n");
    }
    for endpoint in &backend.endpoints {
        let _ = write!(
            out,
            "  server {}:{} weight={} health={}",
            endpoint.address,
            endpoint.port,
            endpoint.weight,
            endpoint.health.as_str()
        );
        if let Some(zone) = &endpoint.zone {
            let _ = write!(out, " zone={}", zone);
        }
        out.push_str(";\n");
    }
    out.push_str("}\n\n");
}

fn render_rule(out: &mut String, rule: &RoutingRule, default_redirect: bool) {
    let _ = writeln!(out, "  location {} {} {{", rule.path_type, rule.path);
    let _ = writeln!(out, "    source {};", rule.source);
    let _ = writeln!(out, "    backend {};", rule.backend);

    let modifiers = &rule.modifiers;
    if let Some(target) = &modifiers.rewrite_target {
        let _ = writeln!(out, "    rewrite {};", target);
    }
    let redirect = modifiers.ssl_redirect.unwrap_or(default_redirect);
    let _ = writeln!(out, "    ssl_redirect {};", on_off(redirect));
    for net in &modifiers.allowlist {
        let _ = writeln!(out, "    allow {};", net);
    }
    if !modifiers.allowlist.is_empty() {
        out.push_str("    deny all;\n");
    }
    if let Some(secs) = modifiers.connect_timeout_secs {
        let _ = writeln!(out, "    proxy_connect_timeout {}s;", secs);
    }
    if let Some(secs) = modifiers.read_timeout_secs {
        let _ = writeln!(out, "    proxy_read_timeout {}s;", secs);
    }
    if let Some(canary) = &rule.canary {
        let _ = write!(out, "    canary {} weight={}", canary.backend, canary.weight);
        if let Some(header) = &canary.header {
            let _ = write!(out, " header={}", header);
        }
        let _ = writeln!(out, " source={};", canary.source);
    }
    out.push_str("  }\n");
}
