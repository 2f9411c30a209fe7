//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to Gateway::new at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Gateway::apply_config swaps the runtime-tunable parts
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Component topology (rate-limit backend, cache size) is fixed at startup;
//!   retry rules, timeouts and alert thresholds are reloadable

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::AlertConfig;
pub use schema::BackendConfig;
pub use schema::CacheConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::GatewayConfig;
pub use schema::HealthCheckConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::RateLimitBackendConfig;
pub use schema::RateLimitConfig;
pub use schema::RetryConfig;
pub use schema::RetryRule;
pub use schema::RetryRules;
pub use schema::TimeoutConfig;
