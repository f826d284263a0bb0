//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failed apply:
//!     → backoff.rs (Backoff: consecutive failures → next retry delay)
//!     → sync queue waits until the retry instant
//!
//! Failed reload signal:
//!     → retries.rs (bounded retries with jittered backoff)
//!     → exhausted: degraded state reported, last good config stays live
//! ```
//!
//! # Design Decisions
//! - Backoff state is an explicit value owned by its user, never global
//! - Jittered backoff prevents synchronized retries
//! - Every external call has a deadline (see the apply module)

pub mod backoff;
pub mod retries;

pub use backoff::{calculate_backoff, Backoff};
pub use retries::{retry_with_backoff, RetryPolicy};
