//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend service location.
    pub backend: BackendConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Client-side rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Alert thresholds.
    pub alerts: AlertConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend service configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL every endpoint is joined onto (e.g., "https://api.example.com/v1/").
    pub base_url: String,

    /// Headers attached to every request (caller headers win on conflict).
    pub default_headers: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/".to_string(),
            default_headers: BTreeMap::new(),
        }
    }
}

/// Timeout configuration for network attempts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-attempt timeout in milliseconds.
    pub request_ms: u64,

    /// Per-attempt timeout used while the backend is degraded or unhealthy.
    pub degraded_request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            degraded_request_ms: 10_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable client-side rate limiting.
    pub enabled: bool,

    /// Window size in milliseconds.
    pub window_ms: u64,

    /// Maximum requests per key per window.
    pub max_requests: u32,

    /// How often the in-process store evicts idle windows, in seconds.
    pub sweep_interval_secs: u64,

    /// Longest the queue will pause for a server-advertised rate-limit reset.
    pub max_server_pause_secs: u64,

    /// Counter store.
    pub backend: RateLimitBackendConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 100,
            sweep_interval_secs: 60,
            max_server_pause_secs: 300,
            backend: RateLimitBackendConfig::Memory,
        }
    }
}

/// Rate limiter counter store selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitBackendConfig {
    /// Per-process counters.
    Memory,
    /// Counters shared by every instance through Redis.
    Redis {
        /// Connection URL (e.g., "redis://127.0.0.1:6379/").
        url: String,
        /// Prefix for all limiter keys.
        #[serde(default = "default_redis_prefix")]
        key_prefix: String,
        /// Budget for a single Redis round-trip before failing open.
        #[serde(default = "default_redis_timeout_ms")]
        command_timeout_ms: u64,
    },
}

fn default_redis_prefix() -> String {
    "ratelimit".to_string()
}

fn default_redis_timeout_ms() -> u64 {
    500
}

/// A single retry rule: backoff multiplier and retry allowance.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct RetryRule {
    /// Factor applied to the exponential backoff delay.
    pub multiplier: u32,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl RetryRule {
    pub const fn new(multiplier: u32, max_retries: u32) -> Self {
        Self {
            multiplier,
            max_retries,
        }
    }
}

/// Retry rule table, one row per failure class.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryRules {
    /// Connection reset, refused, or timed out.
    pub transport: RetryRule,
    /// 500 Internal Server Error.
    pub internal_server_error: RetryRule,
    /// 502 Bad Gateway.
    pub bad_gateway: RetryRule,
    /// 503 Service Unavailable.
    pub service_unavailable: RetryRule,
    /// 504 Gateway Timeout.
    pub gateway_timeout: RetryRule,
    /// Any other 5xx.
    pub other_server_error: RetryRule,
    /// 429 Too Many Requests.
    pub rate_limited: RetryRule,
}

impl Default for RetryRules {
    fn default() -> Self {
        Self {
            transport: RetryRule::new(3, 5),
            internal_server_error: RetryRule::new(2, 2),
            bad_gateway: RetryRule::new(2, 4),
            service_unavailable: RetryRule::new(4, 3),
            gateway_timeout: RetryRule::new(3, 2),
            other_server_error: RetryRule::new(2, 2),
            rate_limited: RetryRule::new(1, 3),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Global cap on attempts per call, first attempt included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay, in milliseconds.
    pub jitter_ms: u64,

    /// Per-failure retry rules.
    pub rules: RetryRules,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 6,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
            rules: RetryRules::default(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a probe.
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the background health probe.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe, joined onto the backend base URL.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub failure_threshold: u32,

    /// Successful probes slower than this are reported as degraded.
    pub latency_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            failure_threshold: 3,
            latency_threshold_ms: 1_000,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Freshness lifetime of an entry in seconds.
    pub ttl_secs: u64,

    /// Maximum number of entries held.
    pub max_entries: usize,

    /// How long past expiry an entry stays available for stale fallback.
    pub max_stale_secs: u64,

    /// Sweep interval for dropping entries past their stale window.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1_000,
            max_stale_secs: 3_600,
            sweep_interval_secs: 60,
        }
    }
}

/// Alert thresholds, evaluated per one-hour window.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Alert when circuit trips in the window exceed this count.
    pub circuit_trips_per_hour: u64,

    /// Alert when rate-limit hits in the window exceed this count.
    pub rate_limit_hits_per_hour: u64,

    /// Alert when the error rate exceeds this percentage.
    pub error_rate_percent: f64,

    /// Error rate is only evaluated after more requests than this.
    pub min_requests_for_error_rate: u64,

    /// Alert when the rolling average response time exceeds this.
    pub response_time_ceiling_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            circuit_trips_per_hour: 3,
            rate_limit_hits_per_hour: 10,
            error_rate_percent: 10.0,
            min_requests_for_error_rate: 50,
            response_time_ceiling_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
