//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (key, tx_id, sequence)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via logging.rs (fmt layer, EnvFilter)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Private keys never appear in log fields
//! - Metrics are cheap (atomic increments) and safe to record before the exporter exists

pub mod logging;
pub mod metrics;
