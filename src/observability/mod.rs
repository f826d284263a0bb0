//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event (object keys, backends, outcomes)
//! - Metrics are cheap (atomic increments) and recorded without an exporter
//!   installed, so tests and the offline tool need no setup

pub mod logging;
pub mod metrics;
