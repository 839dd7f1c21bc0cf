//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! binary installs the Prometheus recorder.

use crate::hls::codec::ResourceKind;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Count a terminal outcome (or a discarded one) per resource kind.
pub fn record_outcome(kind: Option<ResourceKind>, outcome: &'static str) {
    let kind = kind.map_or("unclassified", ResourceKind::as_str);
    ::metrics::counter!("hls_gate_requests_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Time spent waiting on the upstream fetch.
pub fn record_fetch_duration(kind: ResourceKind, start: Instant) {
    ::metrics::histogram!("hls_gate_fetch_duration_seconds", "kind" => kind.as_str())
        .record(start.elapsed().as_secs_f64());
}

pub fn set_in_flight(count: usize) {
    ::metrics::gauge!("hls_gate_in_flight").set(count as f64);
}
