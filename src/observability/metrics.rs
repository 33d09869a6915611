//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_connections_accepted_total` (counter): connections registered
//! - `gate_pending_connections` (gauge): registry size
//! - `gate_pressure_ratio` (gauge): last sampled used/capacity
//! - `gate_evictions_total` (counter): connections force-closed
//! - `gate_eviction_close_failures_total` (counter): failed closes during eviction
//! - `gate_monitor_failures_total` (counter): unreadable resource samples
//! - `gate_handshakes_total{outcome}` (counter): TLS handshake outcomes
//! - `gate_socket_config_failures_total` (counter): closed because socket options failed
//!
//! Recording without an installed recorder is a no-op, so library users and
//! tests do not need to call [`init_metrics`].

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its own HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    metrics::counter!("gate_connections_accepted_total").increment(1);
}

pub fn set_pending(count: usize) {
    metrics::gauge!("gate_pending_connections").set(count as f64);
}

pub fn set_pressure_ratio(ratio: f64) {
    metrics::gauge!("gate_pressure_ratio").set(ratio);
}

pub fn record_evictions(count: usize) {
    metrics::counter!("gate_evictions_total").increment(count as u64);
}

pub fn record_close_failure() {
    metrics::counter!("gate_eviction_close_failures_total").increment(1);
}

pub fn record_monitor_failure() {
    metrics::counter!("gate_monitor_failures_total").increment(1);
}

pub fn record_socket_config_failure() {
    metrics::counter!("gate_socket_config_failures_total").increment(1);
}

/// How a TLS handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Completed,
    Failed,
    Evicted,
}

impl HandshakeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Evicted => "evicted",
        }
    }
}

pub fn record_handshake(outcome: HandshakeOutcome) {
    metrics::counter!("gate_handshakes_total", "outcome" => outcome.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_outcome_labels() {
        let labels: Vec<_> = [HandshakeOutcome::Completed, HandshakeOutcome::Failed, HandshakeOutcome::Evicted]
            .into_iter()
            .map(HandshakeOutcome::as_str)
            .collect();
        assert_eq!(labels, ["completed", "failed", "evicted"]);
    }
}
