//! Client-side rate limiting.
//!
//! # Algorithm (fixed window with blocking)
//! ```text
//! window_start = now - now % window_ms
//! blocked(key) and now < blocked_until → deny, no increment
//! blocked(key) and now ≥ blocked_until → clear block, fresh window
//! count(key, window_start) += 1
//! count > max_requests → blocked_until = window_start + window_ms, deny
//! ```
//!
//! # Backends
//! - memory.rs: per-process map, swept on a timer
//! - redis.rs: shared across instances; INCR + PEXPIRE in one MULTI/EXEC;
//!   fails open when Redis is unreachable

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::config::{RateLimitBackendConfig, RateLimitConfig};

pub use memory::{MemoryRateLimiter, RateLimitWindow};
pub use self::redis::RedisRateLimiter;

/// Window parameters for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOptions {
    pub window: Duration,
    pub max_requests: u32,
}

impl From<&RateLimitConfig> for RateLimitOptions {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms.max(1)),
            max_requests: config.max_requests,
        }
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window (or block) ends.
    pub reset_time: SystemTime,
    /// Zero when allowed; otherwise how long to wait.
    pub retry_after: Duration,
}

impl RateLimitDecision {
    pub fn allow(remaining: u32, reset_in: Duration) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time: SystemTime::now() + reset_in,
            retry_after: Duration::ZERO,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time: SystemTime::now() + retry_after,
            retry_after,
        }
    }
}

/// A fixed-window limiter keyed by string.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn is_allowed(&self, key: &str, options: &RateLimitOptions) -> RateLimitDecision;

    /// Forget all state for `key`.
    async fn reset(&self, key: &str);

    /// Drop idle state; returns the number of entries removed.
    async fn sweep(&self) -> usize {
        0
    }

    fn backend_name(&self) -> &'static str;
}

/// Build the configured limiter backend.
pub fn build_rate_limiter(
    config: &RateLimitConfig,
) -> Result<Arc<dyn RateLimiter>, ::redis::RedisError> {
    let limiter: Arc<dyn RateLimiter> = match &config.backend {
        RateLimitBackendConfig::Memory => Arc::new(MemoryRateLimiter::new()),
        RateLimitBackendConfig::Redis {
            url,
            key_prefix,
            command_timeout_ms,
        } => Arc::new(RedisRateLimiter::new(
            url,
            key_prefix,
            Duration::from_millis(*command_timeout_ms),
        )?),
    };
    tracing::info!(
        backend = limiter.backend_name(),
        window_ms = config.window_ms,
        max_requests = config.max_requests,
        "Rate limiter initialized"
    );
    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_backend() {
        let memory = build_rate_limiter(&RateLimitConfig::default()).unwrap();
        assert_eq!(memory.backend_name(), "memory");

        let config = RateLimitConfig {
            backend: RateLimitBackendConfig::Redis {
                url: "redis://127.0.0.1:6379/".to_string(),
                key_prefix: "test".to_string(),
                command_timeout_ms: 100,
            },
            ..RateLimitConfig::default()
        };
        let shared = build_rate_limiter(&config).unwrap();
        assert_eq!(shared.backend_name(), "redis");
    }

    #[test]
    fn test_factory_rejects_bad_url() {
        let config = RateLimitConfig {
            backend: RateLimitBackendConfig::Redis {
                url: "not a url".to_string(),
                key_prefix: "test".to_string(),
                command_timeout_ms: 100,
            },
            ..RateLimitConfig::default()
        };
        assert!(build_rate_limiter(&config).is_err());
    }
}
