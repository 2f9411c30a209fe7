//! Threshold alerting.
//!
//! Alerts are evaluated against the counters of the current one-hour window.
//! They are observability only and never change request handling.

use std::time::SystemTime;

use serde::Serialize;

use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CircuitTrips,
    RateLimitHits,
    ErrorRate,
    SlowResponses,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::CircuitTrips => "circuit_trips",
            AlertKind::RateLimitHits => "rate_limit_hits",
            AlertKind::ErrorRate => "error_rate",
            AlertKind::SlowResponses => "slow_responses",
        }
    }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// Observed value that crossed the threshold.
    pub value: f64,
    pub threshold: f64,
    pub raised_at: SystemTime,
}

/// Counters the thresholds are checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowCounts {
    pub requests: u64,
    pub failures: u64,
    pub circuit_trips: u64,
    pub rate_limit_hits: u64,
    pub average_response_ms: f64,
}

impl WindowCounts {
    pub fn error_rate_percent(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64 * 100.0
        }
    }
}

/// Every threshold currently exceeded.
pub fn evaluate(counts: &WindowCounts, thresholds: &AlertConfig) -> Vec<Alert> {
    let now = SystemTime::now();
    let mut alerts = Vec::new();

    if counts.circuit_trips > thresholds.circuit_trips_per_hour {
        alerts.push(Alert {
            kind: AlertKind::CircuitTrips,
            message: format!(
                "{} circuit breaker trips this hour (limit {})",
                counts.circuit_trips, thresholds.circuit_trips_per_hour
            ),
            value: counts.circuit_trips as f64,
            threshold: thresholds.circuit_trips_per_hour as f64,
            raised_at: now,
        });
    }

    if counts.rate_limit_hits > thresholds.rate_limit_hits_per_hour {
        alerts.push(Alert {
            kind: AlertKind::RateLimitHits,
            message: format!(
                "{} rate limit hits this hour (limit {})",
                counts.rate_limit_hits, thresholds.rate_limit_hits_per_hour
            ),
            value: counts.rate_limit_hits as f64,
            threshold: thresholds.rate_limit_hits_per_hour as f64,
            raised_at: now,
        });
    }

    let error_rate = counts.error_rate_percent();
    if counts.requests > thresholds.min_requests_for_error_rate
        && error_rate > thresholds.error_rate_percent
    {
        alerts.push(Alert {
            kind: AlertKind::ErrorRate,
            message: format!(
                "error rate {:.1}% over {} requests (limit {:.1}%)",
                error_rate, counts.requests, thresholds.error_rate_percent
            ),
            value: error_rate,
            threshold: thresholds.error_rate_percent,
            raised_at: now,
        });
    }

    let ceiling = thresholds.response_time_ceiling_ms as f64;
    if counts.average_response_ms > ceiling {
        alerts.push(Alert {
            kind: AlertKind::SlowResponses,
            message: format!(
                "average response time {:.0}ms (limit {}ms)",
                counts.average_response_ms, thresholds.response_time_ceiling_ms
            ),
            value: counts.average_response_ms,
            threshold: ceiling,
            raised_at: now,
        });
    }

    alerts
}
