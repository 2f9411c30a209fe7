//! Metrics exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): calls by method and outcome
//! - `gateway_request_duration_seconds` (histogram): end-to-end call latency
//! - `gateway_retries_total` (counter): retried attempts by category
//! - `gateway_cache_operations_total` (counter): hit / miss / stale / store
//! - `gateway_circuit_transitions_total` (counter): breaker state changes
//! - `gateway_rate_limited_total` (counter): client-side and server-advertised limits
//! - `gateway_health_status` (gauge): 2=healthy, 1=degraded, 0=unhealthy
//! - `gateway_queue_depth` (gauge): requests waiting in the queue
//! - `gateway_alerts_total` (counter): alerts raised by kind
//!
//! Helpers are no-ops until `init_metrics` installs a recorder.

use std::net::SocketAddr;

use metrics::Label;
use tokio::time::Instant;

use crate::health::HealthState;
use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, outcome: &str, started: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("outcome", outcome.to_string()),
    ];
    metrics::counter!("gateway_requests_total", labels.clone()).increment(1);
    metrics::histogram!("gateway_request_duration_seconds", labels)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_retry(category: &str) {
    metrics::counter!("gateway_retries_total", "category" => category.to_string()).increment(1);
}

pub fn record_cache(operation: &'static str) {
    metrics::counter!("gateway_cache_operations_total", "operation" => operation).increment(1);
}

pub fn record_circuit_transition(key: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "gateway_circuit_transitions_total",
        "key" => key.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// `source` is `client` for the local limiter, `server` for backend hints.
pub fn record_rate_limited(source: &'static str) {
    metrics::counter!("gateway_rate_limited_total", "source" => source).increment(1);
}

pub fn record_health_status(state: HealthState) {
    metrics::gauge!("gateway_health_status").set(state.as_gauge());
}

pub fn record_queue_depth(depth: usize) {
    metrics::gauge!("gateway_queue_depth").set(depth as f64);
}

pub fn record_alert(kind: &'static str) {
    metrics::counter!("gateway_alerts_total", "kind" => kind).increment(1);
}
