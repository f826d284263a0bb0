//! What the proxy is currently running.

use std::sync::Arc;
use std::time::SystemTime;

use crate::model::{Fingerprint, RoutingModel};

/// The last model successfully pushed to the proxy.
///
/// Replaced only after a dynamic update or full reload succeeds.
#[derive(Debug, Clone)]
pub struct AppliedState {
    pub model: Arc<RoutingModel>,
    pub fingerprint: Fingerprint,
    pub applied_at: SystemTime,
}

impl AppliedState {
    pub fn new(model: Arc<RoutingModel>, fingerprint: Fingerprint) -> Self {
        Self {
            model,
            fingerprint,
            applied_at: SystemTime::now(),
        }
    }
}
