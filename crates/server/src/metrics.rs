//! Prometheus metrics endpoint

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Call once at startup, before any
/// counter is touched.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;

    metrics::describe_counter!("eca_turns_total", "Turns by terminal status");
    metrics::describe_histogram!(
        "eca_turn_duration_seconds",
        "Wall time from turn start to terminal status"
    );
    metrics::describe_counter!("eca_requests_total", "HTTP requests by route");

    PROMETHEUS.set(handle).ok();
    PROMETHEUS.get()
}

pub async fn metrics_handler() -> String {
    PROMETHEUS.get().map(|h| h.render()).unwrap_or_default()
}

pub fn record_request(route: &'static str) {
    metrics::counter!("eca_requests_total", "route" => route).increment(1);
}
