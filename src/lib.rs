//! Ingress reconciliation and configuration convergence for a reverse proxy.

pub mod apply;
pub mod certificates;
pub mod config;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod store;
pub mod sync;
pub mod translate;

pub use config::ControllerConfig;
pub use lifecycle::Shutdown;
pub use model::RoutingModel;
pub use sync::Reconciler;
