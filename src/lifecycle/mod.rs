//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Wallet + ledger client → Claim store → Pipeline
//!     → resume unfinished claims → Start HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight requests → Stop pruner
//!     → Flush claim store → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, flush

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
