//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_intents_total` (counter): intents by kind and outcome
//! - `relay_submit_attempts_total` (counter): broadcast attempts by result
//! - `relay_sequence_resyncs_total` (counter): sequence resyncs after a mismatch
//! - `relay_confirmation_seconds` (histogram): time from broadcast to a tracking outcome
//! - `relay_inflight_claims` (gauge): keys with a run in progress
//! - `relay_ledger_health` (gauge): 1=reachable, 0=unreachable
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_intent(kind: &str, outcome: &str) {
    ::metrics::counter!(
        "relay_intents_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_submit_attempt(result: &'static str) {
    ::metrics::counter!("relay_submit_attempts_total", "result" => result).increment(1);
}

pub fn record_sequence_resync() {
    ::metrics::counter!("relay_sequence_resyncs_total").increment(1);
}

pub fn record_confirmation(elapsed: Duration, outcome: &'static str) {
    ::metrics::histogram!("relay_confirmation_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn set_inflight_claims(count: i64) {
    ::metrics::gauge!("relay_inflight_claims").set(count.max(0) as f64);
}

pub fn record_ledger_health(healthy: bool) {
    ::metrics::gauge!("relay_ledger_health").set(if healthy { 1.0 } else { 0.0 });
}
