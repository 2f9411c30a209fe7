//! Backend health subsystem.
//!
//! # Data Flow
//! ```text
//! Active probing (active.rs):
//!     Periodic timer
//!     → GET <base_url>/<health path> with a bounded timeout
//!     → Fold outcome into state.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Degraded (probe latency)
//!     Healthy/Degraded → Unhealthy (consecutive failures ≥ threshold)
//!
//! Degradation policy (degradation.rs):
//!     HealthState → cache / stale-fallback / timeout / read-suppression switches
//! ```
//!
//! # Design Decisions
//! - Health is driven only by out-of-band probes, never by business traffic
//! - Failures below the threshold leave the status unchanged to avoid flapping

pub mod active;
pub mod degradation;
pub mod state;

pub use active::HealthMonitor;
pub use degradation::DegradationPolicy;
pub use state::{HealthState, HealthStatus, ProbeOutcome};
