//! Graceful-degradation policy.
//!
//! Maps the current health state to the behaviour switches the gateway
//! consults on every call.

use serde::Serialize;

use crate::health::state::HealthState;

/// Behaviour switches derived from backend health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegradationPolicy {
    /// Fresh cache lookups are allowed.
    pub enable_cache: bool,
    /// Callers should surface a "service degraded" notice.
    pub show_notice: bool,
    /// Expired cache entries may be served instead of the network.
    pub allow_stale_fallback: bool,
    /// Attempts use the degraded timeout.
    pub shrink_timeout: bool,
    /// Non-critical reads are skipped without a network attempt.
    pub suppress_non_critical_reads: bool,
}

impl DegradationPolicy {
    pub fn for_state(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => Self {
                enable_cache: true,
                show_notice: false,
                allow_stale_fallback: false,
                shrink_timeout: false,
                suppress_non_critical_reads: false,
            },
            HealthState::Degraded => Self {
                enable_cache: true,
                show_notice: true,
                allow_stale_fallback: true,
                shrink_timeout: true,
                suppress_non_critical_reads: false,
            },
            // Writes are not restricted any further than when degraded.
            HealthState::Unhealthy => Self {
                suppress_non_critical_reads: true,
                ..Self::for_state(HealthState::Degraded)
            },
        }
    }
}
