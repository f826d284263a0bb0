//! Proxy Apply Layer
//!
//! # Responsibilities
//! - Serialize routing models into the proxy configuration format
//! - Push endpoint and certificate changes over the control channel
//! - Validate, write and reload full configurations
//!
//! # Data Flow
//! ```text
//!                      ┌─> DynamicUpdater ──> ProxyControl (loopback HTTP)
//! RoutingModel ─render─┤
//!                      └─> ConfigApplier ──> ProxyProcess (validate, reload)
//! ```
//!
//! # Design Decisions
//! - The proxy is reached only through the `ProxyControl` and `ProxyProcess`
//!   traits so the reconciler can be driven against fakes

pub mod applier;
pub mod control;
pub mod dynamic;
pub mod process;
pub mod render;

pub use applier::{ApplyError, ConfigApplier};
pub use control::{ControlError, HttpControlChannel, ProxyControl};
pub use dynamic::DynamicUpdater;
pub use process::{CommandProcess, ProcessError, ProxyProcess};
pub use render::{CertificateFile, RenderedConfig, Renderer};
