//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against the backend:
//!     → circuit_breaker.rs (fail fast while the endpoint's circuit is open)
//!     → timeouts.rs (deadline + caller cancellation around the transport call)
//!     → On failure: classifier.rs (category, retryable, multiplier, max retries)
//!     → retries.rs (attempt budget) + backoff.rs (delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Classification is a pure function of the failure and the rule table
//! - Client errors (4xx) never count against a circuit

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState, ErrorVerdict, FailureRecord};
pub use classifier::{classify, Classification};
pub use retries::RetryDecision;
