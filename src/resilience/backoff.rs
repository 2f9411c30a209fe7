//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::resilience::classifier::Classification;

/// Exponential delay for a 1-based attempt number, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Random jitter in `[0, max_ms)`.
pub fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

/// Delay before retrying after `attempt` failed.
///
/// A server-supplied `Retry-After` wins; otherwise
/// `backoff(attempt) * multiplier`, capped at `max_delay_ms`, plus jitter.
pub fn retry_delay(attempt: u32, classification: &Classification, config: &RetryConfig) -> Duration {
    if let Some(retry_after) = classification.retry_after {
        return retry_after;
    }

    let base = calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms);
    let scaled = base
        .saturating_mul(classification.multiplier.max(1))
        .min(Duration::from_millis(config.max_delay_ms));

    scaled + jitter(config.jitter_ms)
}
