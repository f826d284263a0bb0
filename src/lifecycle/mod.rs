//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Connect to cluster → Start watches → Start reconciler → Initial resync
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop watches → Finish in-flight apply → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Force resync
//! ```
//!
//! # Design Decisions
//! - Shutdown has timeout: forced exit after deadline
//! - An in-flight apply is never interrupted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
