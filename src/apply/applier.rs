//! Full configuration apply.
//!
//! # Responsibilities
//! - Write certificate files and the configuration atomically
//! - Dry-run the candidate before it can become live
//! - Reload the proxy with bounded retries
//! - Hold back the next apply until the previous reload has settled
//!
//! # Data Flow
//! ```text
//! RenderedConfig
//!     │
//!     ├─> ssl_dir/<name>-<digest>.pem (temp + rename)
//!     ├─> <config>.candidate ──validate──> rename over <config>
//!     └─> reload (retry with backoff) ──> prune unused PEMs ──> settle deadline
//! ```
//!
//! # Design Decisions
//! - A rejected candidate is removed and the live file is never touched;
//!   certificate paths carry a content digest, so files the running
//!   configuration names are never rewritten
//! - PEM files are pruned only after a reload succeeds, when the proxy no
//!   longer references them
//! - Exhausted reload retries mark the controller degraded; the proxy keeps
//!   serving its last loaded configuration

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::apply::process::{ProcessError, ProxyProcess};
use crate::apply::render::RenderedConfig;
use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::resilience::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rendered configuration rejected: {0}")]
    Validation(#[source] ProcessError),

    #[error("proxy reload failed after {attempts} attempts: {source}")]
    ReloadExhausted {
        attempts: u32,
        #[source]
        source: ProcessError,
    },
}

pub struct ConfigApplier {
    config_path: PathBuf,
    certificate_dir: Option<PathBuf>,
    process: Arc<dyn ProxyProcess>,
    retry: RetryPolicy,
    settle: Duration,
    settle_until: Option<Instant>,
}

impl ConfigApplier {
    pub fn new(
        config_path: impl Into<PathBuf>,
        process: Arc<dyn ProxyProcess>,
        retry: RetryPolicy,
        settle: Duration,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            certificate_dir: None,
            process,
            retry,
            settle,
            settle_until: None,
        }
    }

    pub fn from_config(config: &ProxyConfig, process: Arc<dyn ProxyProcess>) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.reload_retries.max(1),
            ..RetryPolicy::default()
        };
        Self::new(
            config.config_path.clone(),
            process,
            retry,
            Duration::from_millis(config.reload_settle_ms),
        )
        .with_certificate_dir(config.ssl_dir.clone())
    }

    /// Remove PEM files in `dir` that a reloaded configuration no longer
    /// references.
    pub fn with_certificate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.certificate_dir = Some(dir.into());
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Path the candidate is written to before validation.
    pub fn candidate_path(&self) -> PathBuf {
        with_suffix(&self.config_path, ".candidate")
    }

    pub async fn apply(&mut self, rendered: &RenderedConfig) -> Result<(), ApplyError> {
        if let Some(deadline) = self.settle_until.take() {
            if deadline > Instant::now() {
                tracing::debug!("Waiting for previous reload to settle");
                tokio::time::sleep_until(deadline).await;
            }
        }

        for file in &rendered.certificate_files {
            write_atomic(&file.path, file.contents.as_bytes()).await?;
        }

        let candidate = self.candidate_path();
        write_file(&candidate, rendered.text.as_bytes()).await?;

        if let Err(e) = self.process.validate(&candidate).await {
            let _ = tokio::fs::remove_file(&candidate).await;
            metrics::record_reload(false);
            tracing::error!(error = %e, "Rendered configuration failed validation, keeping current configuration");
            return Err(ApplyError::Validation(e));
        }

        tokio::fs::rename(&candidate, &self.config_path)
            .await
            .map_err(|source| ApplyError::Write {
                path: self.config_path.clone(),
                source,
            })?;

        let process = &self.process;
        let reloaded = retry_with_backoff(&self.retry, "proxy reload", || process.reload()).await;
        metrics::record_reload(reloaded.is_ok());

        match reloaded {
            Ok(()) => {
                metrics::set_degraded(false);
                if let Some(dir) = &self.certificate_dir {
                    prune_certificates(dir, rendered).await;
                }
                self.settle_until = Some(Instant::now() + self.settle);
                tracing::info!(
                    path = %self.config_path.display(),
                    fingerprint = %rendered.fingerprint,
                    "Proxy reloaded"
                );
                Ok(())
            }
            Err(source) => {
                metrics::set_degraded(true);
                tracing::error!(
                    attempts = self.retry.max_attempts,
                    error = %source,
                    "Proxy reload retries exhausted, serving last loaded configuration"
                );
                Err(ApplyError::ReloadExhausted {
                    attempts: self.retry.max_attempts,
                    source,
                })
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ApplyError> {
    let wrap = |source| ApplyError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
    }
    tokio::fs::write(path, contents).await.map_err(wrap)
}

/// Write through a temporary sibling so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ApplyError> {
    let tmp = with_suffix(path, ".tmp");
    write_file(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| ApplyError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete `*.pem` files in `dir` that `rendered` does not list.
async fn prune_certificates(dir: &Path, rendered: &RenderedConfig) {
    let keep: BTreeSet<&Path> = rendered
        .certificate_files
        .iter()
        .map(|file| file.path.as_path())
        .collect();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list certificate directory");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to list certificate directory");
                break;
            }
        };
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "pem") || keep.contains(path.as_path()) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed unused certificate file"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove certificate file")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::apply::render::CertificateFile;
    use crate::model::Fingerprint;

    #[derive(Default)]
    struct FakeProcess {
        reject: bool,
        reload_failures: u32,
        reloads: AtomicU32,
    }

    #[async_trait]
    impl ProxyProcess for FakeProcess {
        async fn validate(&self, candidate: &Path) -> Result<(), ProcessError> {
            assert!(candidate.exists());
            if self.reject {
                return Err(ProcessError::Failed {
                    program: "proxy".into(),
                    status: "exit status: 1".into(),
                    output: "unknown directive".into(),
                });
            }
            Ok(())
        }

        async fn reload(&self) -> Result<(), ProcessError> {
            let n = self.reloads.fetch_add(1, Ordering::SeqCst);
            if n < self.reload_failures {
                return Err(ProcessError::NotConfigured("reload"));
            }
            Ok(())
        }
    }

    fn rendered(dir: &Path, text: &str) -> RenderedConfig {
        with_certificate(dir, text, "default-tls-aaaa.pem", "CERT\nKEY\n")
    }

    fn with_certificate(dir: &Path, text: &str, file: &str, contents: &str) -> RenderedConfig {
        RenderedConfig {
            text: text.into(),
            certificate_files: vec![CertificateFile {
                path: dir.join("ssl").join(file),
                contents: contents.into(),
            }],
            fingerprint: Fingerprint("f".into()),
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay_ms: 10,
            max_delay_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_apply_writes_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.conf");
        let process = Arc::new(FakeProcess::default());
        let mut applier = ConfigApplier::new(&path, process.clone(), policy(3), Duration::ZERO);

        applier.apply(&rendered(dir.path(), "new")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ssl/default-tls-aaaa.pem")).unwrap(),
            "CERT\nKEY\n"
        );
        assert!(!applier.candidate_path().exists());
        assert_eq!(process.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_candidate_leaves_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.conf");
        std::fs::write(&path, "old").unwrap();

        let process = Arc::new(FakeProcess {
            reject: true,
            ..Default::default()
        });
        let mut applier = ConfigApplier::new(&path, process.clone(), policy(3), Duration::ZERO);

        let err = applier.apply(&rendered(dir.path(), "broken")).await.unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
        assert!(!applier.candidate_path().exists());
        assert_eq!(process.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_candidate_leaves_live_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.conf");
        let mut applier = ConfigApplier::new(
            &path,
            Arc::new(FakeProcess::default()),
            policy(1),
            Duration::ZERO,
        )
        .with_certificate_dir(dir.path().join("ssl"));
        applier.apply(&rendered(dir.path(), "old")).await.unwrap();

        let mut rejecting = ConfigApplier::new(
            &path,
            Arc::new(FakeProcess {
                reject: true,
                ..Default::default()
            }),
            policy(1),
            Duration::ZERO,
        )
        .with_certificate_dir(dir.path().join("ssl"));
        let renewed = with_certificate(dir.path(), "renewed", "default-tls-bbbb.pem", "CERT2\nKEY2\n");
        rejecting.apply(&renewed).await.unwrap_err();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ssl/default-tls-aaaa.pem")).unwrap(),
            "CERT\nKEY\n"
        );
    }

    #[tokio::test]
    async fn test_successful_reload_prunes_unused_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let ssl = dir.path().join("ssl");
        std::fs::create_dir_all(&ssl).unwrap();
        std::fs::write(ssl.join("default-gone-cccc.pem"), "OLD").unwrap();
        std::fs::write(ssl.join("README"), "kept").unwrap();

        let mut applier = ConfigApplier::new(
            dir.path().join("proxy.conf"),
            Arc::new(FakeProcess::default()),
            policy(1),
            Duration::ZERO,
        )
        .with_certificate_dir(&ssl);
        applier.apply(&rendered(dir.path(), "one")).await.unwrap();

        assert!(!ssl.join("default-gone-cccc.pem").exists());
        assert!(ssl.join("default-tls-aaaa.pem").exists());
        assert!(ssl.join("README").exists());

        let renewed = with_certificate(dir.path(), "two", "default-tls-bbbb.pem", "CERT2\nKEY2\n");
        applier.apply(&renewed).await.unwrap();
        assert!(!ssl.join("default-tls-aaaa.pem").exists());
        assert!(ssl.join("default-tls-bbbb.pem").exists());
    }

    #[tokio::test]
    async fn test_rejected_apply_prunes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ssl = dir.path().join("ssl");
        std::fs::create_dir_all(&ssl).unwrap();
        std::fs::write(ssl.join("default-live-dddd.pem"), "LIVE").unwrap();

        let mut applier = ConfigApplier::new(
            dir.path().join("proxy.conf"),
            Arc::new(FakeProcess {
                reject: true,
                ..Default::default()
            }),
            policy(1),
            Duration::ZERO,
        )
        .with_certificate_dir(&ssl);
        applier.apply(&rendered(dir.path(), "broken")).await.unwrap_err();

        assert!(ssl.join("default-live-dddd.pem").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let process = Arc::new(FakeProcess {
            reload_failures: 2,
            ..Default::default()
        });
        let mut applier = ConfigApplier::new(
            dir.path().join("proxy.conf"),
            process.clone(),
            policy(3),
            Duration::ZERO,
        );

        applier.apply(&rendered(dir.path(), "new")).await.unwrap();
        assert_eq!(process.reloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let process = Arc::new(FakeProcess {
            reload_failures: u32::MAX,
            ..Default::default()
        });
        let mut applier = ConfigApplier::new(
            dir.path().join("proxy.conf"),
            process.clone(),
            policy(2),
            Duration::ZERO,
        );

        let err = applier.apply(&rendered(dir.path(), "new")).await.unwrap_err();
        assert!(matches!(err, ApplyError::ReloadExhausted { attempts: 2, .. }));
        assert_eq!(process.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_apply_waits_for_settle() {
        let dir = tempfile::tempdir().unwrap();
        let process = Arc::new(FakeProcess::default());
        let mut applier = ConfigApplier::new(
            dir.path().join("proxy.conf"),
            process,
            policy(1),
            Duration::from_secs(2),
        );

        applier.apply(&rendered(dir.path(), "one")).await.unwrap();
        let start = Instant::now();
        applier.apply(&rendered(dir.path(), "two")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_candidate_path() {
        let process: Arc<dyn ProxyProcess> = Arc::new(FakeProcess::default());
        let applier = ConfigApplier::new("/etc/proxy/proxy.conf", process, policy(1), Duration::ZERO);
        assert_eq!(
            applier.candidate_path(),
            PathBuf::from("/etc/proxy/proxy.conf.candidate")
        );
    }
}
