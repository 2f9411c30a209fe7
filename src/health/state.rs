//! Backend health state machine.
//!
//! # States
//! - Healthy: last probe succeeded within the latency threshold
//! - Degraded: last probe succeeded but was slow
//! - Unhealthy: `failure_threshold` consecutive probes failed
//!
//! # State Transitions
//! ```text
//! probe success, latency ≤ threshold → Healthy, failures = 0
//! probe success, latency > threshold → Degraded, failures = 0
//! probe failure                      → failures += 1
//!     failures ≥ failure_threshold   → Unhealthy
//!     otherwise                      → status unchanged (sticky)
//! ```
//!
//! # Design Decisions
//! - Only probe outcomes move the state; business requests never do
//! - A single failure never flips a healthy backend

use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Coarse backend health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }

    /// Gauge value: 2 healthy, 1 degraded, 0 unhealthy.
    pub fn as_gauge(&self) -> f64 {
        match self {
            HealthState::Healthy => 2.0,
            HealthState::Degraded => 1.0,
            HealthState::Unhealthy => 0.0,
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { latency: Duration },
    Failure { reason: String },
}

/// Latest view of backend health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub status: HealthState,
    pub consecutive_failures: u32,
    pub last_check_at: Option<SystemTime>,
    pub response_time_ms: Option<u64>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: true,
            status: HealthState::Healthy,
            consecutive_failures: 0,
            last_check_at: None,
            response_time_ms: None,
        }
    }
}

impl HealthStatus {
    /// Fold one probe outcome into the status.
    pub fn apply(&mut self, outcome: &ProbeOutcome, failure_threshold: u32, latency_threshold: Duration) {
        self.last_check_at = Some(SystemTime::now());
        match outcome {
            ProbeOutcome::Success { latency } => {
                self.consecutive_failures = 0;
                self.response_time_ms = Some(latency.as_millis() as u64);
                self.status = if *latency > latency_threshold {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                };
            }
            ProbeOutcome::Failure { .. } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.response_time_ms = None;
                if self.consecutive_failures >= failure_threshold.max(1) {
                    self.status = HealthState::Unhealthy;
                }
            }
        }
        self.is_healthy = self.status == HealthState::Healthy;
    }
}
