//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway, queue, breaker, health monitor produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (Prometheus counters, gauges, histograms)
//!     → collector.rs (in-process counters + alert window)
//!         → alerts.rs (threshold evaluation)
//!         → broadcast subscribers, recent-alert list, warn logs
//! ```
//!
//! # Design Decisions
//! - Every call runs in a span carrying its request ID
//! - Alerts are observability only; they never alter request handling
//! - Prometheus export is optional; the collector always runs

pub mod alerts;
pub mod collector;
pub mod logging;
pub mod metrics;

pub use alerts::{Alert, AlertKind};
pub use collector::{MetricsCollector, MetricsSnapshot};
