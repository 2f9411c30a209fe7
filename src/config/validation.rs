//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! consistency. All problems are collected, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, RateLimitBackendConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.backend.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "backend.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("backend.base_url", e.to_string())),
    }

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }
    if config.timeouts.degraded_request_ms == 0 {
        errors.push(ValidationError::new("timeouts.degraded_request_ms", "must be > 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
        }
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be > 0"));
        }
        if config.rate_limit.max_server_pause_secs == 0 {
            errors.push(ValidationError::new(
                "rate_limit.max_server_pause_secs",
                "must be > 0",
            ));
        }
        if let RateLimitBackendConfig::Redis { url, .. } = &config.rate_limit.backend {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                errors.push(ValidationError::new(
                    "rate_limit.backend.url",
                    "must be a redis:// or rediss:// URL",
                ));
            }
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.circuit_breaker.enabled && config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be > 0",
        ));
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
        }
        if config.health_check.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "health_check.failure_threshold",
                "must be > 0",
            ));
        }
    }

    if config.cache.enabled && config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0"));
    }

    if !(0.0..=100.0).contains(&config.alerts.error_rate_percent) {
        errors.push(ValidationError::new(
            "alerts.error_rate_percent",
            "must be between 0 and 100",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
