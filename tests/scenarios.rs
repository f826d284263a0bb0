//! End-to-end reconciliation scenarios against fake proxy collaborators.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use ingress_sync::apply::ApplyError;
use ingress_sync::model::CertificateStatus;
use ingress_sync::store::ObjectKey;
use ingress_sync::sync::{Outcome, ReconcileError, ReloadReason};
use ingress_sync::translate::{DefectKind, TranslateOptions};

fn seed_web(h: &mut Harness, endpoints: &[&str]) {
    h.upsert(mk_ingress("web", &[("example.com", "/", "web")]));
    h.upsert(mk_service("web"));
    h.upsert(mk_slice("web-abc", "web", 1, endpoints));
}

#[tokio::test]
async fn test_add_ingress_rule_triggers_one_full_reload() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1", "10.0.0.2"]);

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Initial));
    assert_eq!(h.process.reloads(), 1);

    let applied = h.reconciler.applied().unwrap();
    let server = applied.model.server("example.com").unwrap();
    let backend = applied.model.backend(&server.rules[0].backend).unwrap();
    assert_eq!(backend.endpoints.len(), 2);

    let live = h.live_config();
    assert!(live.contains("server example.com {"));
    assert!(live.contains("server 10.0.0.1:8080"));
    assert!(live.contains("server 10.0.0.2:8080"));
}

#[tokio::test]
async fn test_endpoint_scale_down_is_dynamic() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    h.reconciler.reconcile_once().await.unwrap();
    let live_before = h.live_config();

    h.upsert(mk_slice("web-abc", "web", 2, &["10.0.0.1", "10.0.0.2"]));
    let outcome = h.reconciler.reconcile_once().await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Dynamic {
            backends: 1,
            certificates: 0
        }
    );
    assert_eq!(h.process.reloads(), 1);
    assert_eq!(h.live_config(), live_before);

    let pushes = h.control.backend_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0][0].name, "default-web-80");
    assert_eq!(pushes[0][0].endpoints.len(), 2);
}

#[tokio::test]
async fn test_unchanged_store_is_noop() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.reconciler.reconcile_once().await.unwrap();
    let fingerprint = h.reconciler.applied().unwrap().fingerprint.clone();

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::NoOp);
    assert_eq!(h.process.validations(), 1);
    assert_eq!(h.process.reloads(), 1);
    assert!(h.control.backend_pushes().is_empty());
    assert_eq!(h.reconciler.applied().unwrap().fingerprint, fingerprint);
}

#[tokio::test]
async fn test_mismatched_certificate_is_excluded() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.upsert(with_tls(
        mk_ingress("web", &[("example.com", "/", "web")]),
        "example.com",
        "web-tls",
    ));
    h.upsert(mk_tls_secret("web-tls", 1, &["example.com"], false));

    h.reconciler.reconcile_once().await.unwrap();

    let applied = h.reconciler.applied().unwrap();
    let server = applied.model.server("example.com").unwrap();
    assert!(server.certificate.is_none());
    assert!(applied.model.certificates.is_empty());
    assert!(h
        .reconciler
        .defects()
        .any(|d| d.kind == DefectKind::CertificateMismatch));
}

#[tokio::test]
async fn test_valid_certificate_is_bound_and_written() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.upsert(with_tls(
        mk_ingress("web", &[("example.com", "/", "web")]),
        "example.com",
        "web-tls",
    ));
    h.upsert(mk_tls_secret("web-tls", 1, &["example.com"], true));

    h.reconciler.reconcile_once().await.unwrap();

    let applied = h.reconciler.applied().unwrap();
    let source = ObjectKey::new("default", "web-tls");
    assert_eq!(
        applied.model.server("example.com").unwrap().certificate,
        Some(source.clone())
    );
    assert_eq!(
        applied.model.certificate(&source).unwrap().status,
        CertificateStatus::Valid
    );
    let files = h.ssl_files();
    assert_eq!(files.len(), 1);
    let (name, contents) = files.iter().next().unwrap();
    assert!(name.starts_with("default-web-tls-") && name.ends_with(".pem"));
    assert!(contents.contains("BEGIN CERTIFICATE"));
    assert!(h.live_config().contains(name.as_str()));
}

#[tokio::test]
async fn test_malformed_rule_among_valid_ones() {
    let mut h = Harness::new();
    h.upsert(mk_service("web"));
    h.upsert(mk_slice("web-abc", "web", 1, &["10.0.0.1"]));
    for i in 0..10 {
        let host = format!("site-{i}.example.com");
        let path = if i == 4 { "no-leading-slash" } else { "/" };
        h.upsert(mk_ingress(&format!("site-{i}"), &[(host.as_str(), path, "web")]));
    }

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Initial));

    let applied = h.reconciler.applied().unwrap();
    assert_eq!(applied.model.servers.len(), 9);
    assert!(applied.model.server("site-4.example.com").is_none());

    let defects: Vec<_> = h.reconciler.defects().collect();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].kind, DefectKind::MalformedObject);
}

#[tokio::test]
async fn test_rejected_config_keeps_previous_state() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.reconciler.reconcile_once().await.unwrap();
    let applied_before = h.reconciler.applied().unwrap().fingerprint.clone();
    let live_before = h.live_config();

    h.upsert(mk_ingress("api", &[("api.example.com", "/", "web")]));
    h.process.reject.store(true, Ordering::SeqCst);

    let err = h.reconciler.reconcile_once().await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Apply(ApplyError::Validation(_))
    ));
    assert_eq!(h.reconciler.applied().unwrap().fingerprint, applied_before);
    assert_eq!(h.live_config(), live_before);
    assert_eq!(h.process.reloads(), 1);
    assert_eq!(h.reconciler.retry().failures(), 1);
    assert!(h.reconciler.retry().retry_at().is_some());

    // The retry diffs against what is still live and succeeds once accepted.
    h.process.reject.store(false, Ordering::SeqCst);
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Topology));
    assert_eq!(h.reconciler.retry().failures(), 0);
    assert!(h.reconciler.retry().retry_at().is_none());
    assert!(h.live_config().contains("server api.example.com {"));
}

fn seed_tls(h: &mut Harness) {
    seed_web(h, &["10.0.0.1"]);
    h.upsert(with_tls(
        mk_ingress("web", &[("example.com", "/", "web")]),
        "example.com",
        "web-tls",
    ));
    h.upsert(mk_tls_secret("web-tls", 1, &["example.com"], true));
}

#[tokio::test]
async fn test_rejected_renewal_leaves_live_certificate_files() {
    let mut h = Harness::new();
    seed_tls(&mut h);
    h.reconciler.reconcile_once().await.unwrap();
    let live_before = h.live_config();
    let files_before = h.ssl_files();

    h.upsert(mk_tls_secret("web-tls", 2, &["example.com"], true));
    h.process.reject.store(true, Ordering::SeqCst);
    h.reconciler.reconcile_once().await.unwrap_err();

    assert_eq!(h.live_config(), live_before);
    let files_after = h.ssl_files();
    for (name, contents) in &files_before {
        assert_eq!(files_after.get(name), Some(contents), "{name} was rewritten");
    }
}

#[tokio::test]
async fn test_reload_removes_unreferenced_certificate_files() {
    let mut h = Harness::new();
    seed_tls(&mut h);
    h.reconciler.reconcile_once().await.unwrap();
    let old_files = h.ssl_files();

    h.upsert(mk_tls_secret("web-tls", 2, &["example.com"], true));
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::CertificateContent));

    let files = h.ssl_files();
    assert_eq!(files.len(), 1);
    assert!(old_files.keys().all(|name| !files.contains_key(name)));

    // Dropping TLS from the ingress unbinds the secret and removes its file.
    let mut plain = mk_ingress("web", &[("example.com", "/", "web")]);
    plain.metadata.resource_version = Some("3".into());
    h.upsert(plain);
    h.reconciler.reconcile_once().await.unwrap();
    assert!(h.ssl_files().is_empty());
}

#[tokio::test]
async fn test_failed_dynamic_update_falls_back_to_reload() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1", "10.0.0.2"]);
    h.reconciler.reconcile_once().await.unwrap();

    h.control.fail.store(true, Ordering::SeqCst);
    h.upsert(mk_slice("web-abc", "web", 2, &["10.0.0.1"]));

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::DynamicUpdateFailed));
    assert_eq!(h.process.reloads(), 2);
    assert!(!h.live_config().contains("10.0.0.2"));
}

#[tokio::test]
async fn test_reload_exhaustion_is_reported() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.process.fail_reload.store(true, Ordering::SeqCst);

    let err = h.reconciler.reconcile_once().await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Apply(ApplyError::ReloadExhausted { attempts: 2, .. })
    ));
    assert_eq!(h.process.reloads(), 2);
    assert!(h.reconciler.applied().is_none());

    h.process.fail_reload.store(false, Ordering::SeqCst);
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Initial));
}

#[tokio::test]
async fn test_certificate_renewal_requires_reload_without_hot_swap() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.upsert(with_tls(
        mk_ingress("web", &[("example.com", "/", "web")]),
        "example.com",
        "web-tls",
    ));
    h.upsert(mk_tls_secret("web-tls", 1, &["example.com"], true));
    h.reconciler.reconcile_once().await.unwrap();

    h.upsert(mk_tls_secret("web-tls", 2, &["example.com"], true));
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::CertificateContent));
}

#[tokio::test]
async fn test_certificate_renewal_with_hot_swap() {
    let control = FakeControl {
        certificate_swap: true,
        ..Default::default()
    };
    let mut h = Harness::with(control, |config| config.proxy.hot_certificate_swap = true);
    seed_web(&mut h, &["10.0.0.1"]);
    h.upsert(with_tls(
        mk_ingress("web", &[("example.com", "/", "web")]),
        "example.com",
        "web-tls",
    ));
    h.upsert(mk_tls_secret("web-tls", 1, &["example.com"], true));
    h.reconciler.reconcile_once().await.unwrap();

    h.upsert(mk_tls_secret("web-tls", 2, &["example.com"], true));
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Dynamic {
            backends: 0,
            certificates: 1
        }
    );
    assert_eq!(h.control.certificate_pushes(), 1);
    assert_eq!(h.process.reloads(), 1);
}

#[tokio::test]
async fn test_annotation_change_forces_reload() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.reconciler.reconcile_once().await.unwrap();

    let mut annotated = with_annotations(
        mk_ingress("web", &[("example.com", "/", "web")]),
        &[("rewrite-target", "/v2")],
    );
    annotated.metadata.resource_version = Some("2".into());
    h.upsert(annotated);

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Topology));
    assert!(h.live_config().contains("rewrite /v2;"));
}

#[tokio::test]
async fn test_ingress_class_change_applies_on_next_pass() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.reconciler.reconcile_once().await.unwrap();

    let options = TranslateOptions {
        ingress_class: "internal".into(),
        ..TranslateOptions::default()
    };
    h.options.send(options).unwrap();

    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, Outcome::Reloaded(ReloadReason::Topology));
    assert!(h.reconciler.applied().unwrap().model.servers.is_empty());
}

#[tokio::test]
async fn test_deleted_service_empties_backend_dynamically() {
    let mut h = Harness::new();
    seed_web(&mut h, &["10.0.0.1"]);
    h.reconciler.reconcile_once().await.unwrap();

    h.delete(mk_service("web"));
    let outcome = h.reconciler.reconcile_once().await.unwrap();
    assert!(matches!(outcome, Outcome::Dynamic { backends: 1, .. }));
    assert!(h.control.backend_pushes()[0][0].endpoints.is_empty());
    assert!(h
        .reconciler
        .defects()
        .any(|d| d.kind == DefectKind::UnresolvedBackend));
}
