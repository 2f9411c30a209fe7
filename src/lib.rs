//! Client-side resilient API gateway.
//!
//! Every outbound call to the backend goes through one [`Gateway`], which
//! layers queueing with rate limiting, response caching, categorized retries,
//! per-endpoint circuit breaking, health-driven degradation and usage metrics.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller
//!     │  RequestDescriptor
//!     ▼
//!  ┌──────────────────────────────────────────────────────────────────┐
//!  │ gateway                                                          │
//!  │   health ──▶ DegradationPolicy ──▶ cache (fresh / stale)         │
//!  │                    │                                             │
//!  │                    ▼                                             │
//!  │   queue (FIFO) ──▶ rate_limit ──▶ resilience::circuit_breaker    │
//!  │                                        │                         │
//!  │                                        ▼                         │
//!  │                          transport (reqwest, deadline, cancel)   │
//!  │                                        │ failure                 │
//!  │                                        ▼                         │
//!  │            resilience::classifier ──▶ retries + backoff ──┐      │
//!  │                    ▲                                       │      │
//!  │                    └───────────────────────────────────────┘      │
//!  │                                                                  │
//!  │   observability: tracing logs, Prometheus metrics, alert window  │
//!  │   config: TOML + validation + hot reload    lifecycle: shutdown  │
//!  └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod rate_limit;
pub mod resilience;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{ErrorCategory, GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use lifecycle::Shutdown;
pub use transport::{ApiResponse, RequestDescriptor};
