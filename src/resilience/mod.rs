//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Ledger call:
//!     → timeouts.rs (every call has a deadline; elapsed = network error)
//!     → On network error: retries.rs (backoff before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for network errors, never for rejections
//! - Jittered backoff prevents thundering herd against the RPC endpoint

pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::with_deadline;
