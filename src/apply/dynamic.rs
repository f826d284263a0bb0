//! In-place updates through the proxy control channel.

use std::sync::Arc;

use crate::apply::control::{ControlError, ProxyControl};
use crate::observability::metrics;
use crate::sync::detector::DynamicChanges;

/// Pushes endpoint and certificate changes without touching the
/// configuration file. Failures are returned, never retried here.
#[derive(Clone)]
pub struct DynamicUpdater {
    control: Arc<dyn ProxyControl>,
}

impl DynamicUpdater {
    pub fn new(control: Arc<dyn ProxyControl>) -> Self {
        Self { control }
    }

    pub fn supports_certificate_swap(&self) -> bool {
        self.control.supports_certificate_swap()
    }

    pub async fn push(&self, changes: &DynamicChanges) -> Result<(), ControlError> {
        let result = self.push_inner(changes).await;
        metrics::record_dynamic_update(result.is_ok());
        result
    }

    async fn push_inner(&self, changes: &DynamicChanges) -> Result<(), ControlError> {
        if !changes.backends.is_empty() {
            self.control.push_backends(&changes.backends).await?;
            tracing::info!(
                backends = changes.backends.len(),
                names = ?changes.backends.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
                "Pushed backend endpoints"
            );
        }
        if !changes.certificates.is_empty() {
            self.control.push_certificates(&changes.certificates).await?;
            tracing::info!(
                certificates = changes.certificates.len(),
                "Swapped certificates in place"
            );
        }
        Ok(())
    }
}
