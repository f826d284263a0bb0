//! The managed proxy process.
//!
//! Validation runs the proxy's own dry-run check against a candidate file.
//! Reload sends the OS-level reload instruction. Both are plain commands
//! with a `{config}` placeholder substituted by the candidate path.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ProxyConfig;

const CONFIG_PLACEHOLDER: &str = "{config}";

#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },
}

#[async_trait]
pub trait ProxyProcess: Send + Sync {
    /// Check a candidate configuration without applying it.
    async fn validate(&self, candidate: &Path) -> Result<(), ProcessError>;

    /// Make the proxy pick up the live configuration file.
    async fn reload(&self) -> Result<(), ProcessError>;
}

/// Runs configured commands against the proxy.
#[derive(Debug, Clone)]
pub struct CommandProcess {
    test_command: Vec<String>,
    reload_command: Vec<String>,
    config_path: String,
    timeout: Duration,
}

impl CommandProcess {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            test_command: config.test_command.clone(),
            reload_command: config.reload_command.clone(),
            config_path: config.config_path.display().to_string(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn run(&self, command: &[String], config: &str) -> Result<(), ProcessError> {
        let Some((program, args)) = command.split_first() else {
            return Err(ProcessError::NotConfigured("proxy"));
        };
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.replace(CONFIG_PLACEHOLDER, config))
            .collect();

        tracing::debug!(program = %program, args = ?args, "Running proxy command");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessError::Spawn {
                    program: program.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ProcessError::Timeout {
                    program: program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if text.is_empty() {
            text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Err(ProcessError::Failed {
            program: program.clone(),
            status: output.status.to_string(),
            output: text,
        })
    }
}

#[async_trait]
impl ProxyProcess for CommandProcess {
    async fn validate(&self, candidate: &Path) -> Result<(), ProcessError> {
        if self.test_command.is_empty() {
            tracing::debug!("No test command configured, skipping validation");
            return Ok(());
        }
        self.run(&self.test_command, &candidate.display().to_string())
            .await
    }

    async fn reload(&self) -> Result<(), ProcessError> {
        if self.reload_command.is_empty() {
            return Err(ProcessError::NotConfigured("reload"));
        }
        self.run(&self.reload_command, &self.config_path).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn process(test: &[&str], reload: &[&str], timeout: Duration) -> CommandProcess {
        CommandProcess {
            test_command: test.iter().map(|s| s.to_string()).collect(),
            reload_command: reload.iter().map(|s| s.to_string()).collect(),
            config_path: "/etc/proxy/proxy.conf".into(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_validate_substitutes_candidate_path() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("proxy.conf.candidate");
        std::fs::write(&candidate, "ok").unwrap();

        let p = process(&["test", "-f", "{config}"], &[], Duration::from_secs(5));
        assert!(p.validate(&candidate).await.is_ok());

        let missing = dir.path().join("missing");
        let err = p.validate(&missing).await.unwrap_err();
        assert!(matches!(err, ProcessError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_validate_without_command_passes() {
        let p = process(&[], &[], Duration::from_secs(5));
        assert!(p.validate(Path::new("/nonexistent")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_failure_reports_output() {
        let p = process(&[], &["sh", "-c", "echo broken >&2; exit 3"], Duration::from_secs(5));
        match p.reload().await.unwrap_err() {
            ProcessError::Failed { output, .. } => assert_eq!(output, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_reload_requires_command() {
        let p = process(&[], &[], Duration::from_secs(5));
        assert!(matches!(
            p.reload().await.unwrap_err(),
            ProcessError::NotConfigured("reload")
        ));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let p = process(&[], &["sleep", "5"], Duration::from_millis(50));
        assert!(matches!(
            p.reload().await.unwrap_err(),
            ProcessError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let p = process(&[], &["/definitely/not/here"], Duration::from_secs(1));
        assert!(matches!(
            p.reload().await.unwrap_err(),
            ProcessError::Spawn { .. }
        ));
    }
}
