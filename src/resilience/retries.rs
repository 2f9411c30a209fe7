//! Retry decisions.
//!
//! The number of attempts for a call is bounded twice: by the rule of the
//! failure class just observed (`max_retries + 1`) and by the global
//! `retries.max_attempts` cap. Calls flagged `allow_retry = false` get one
//! attempt.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::retry_delay;
use crate::resilience::classifier::Classification;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then try again.
    Retry(Duration),
    /// Surface the failure.
    GiveUp,
}

/// Attempts allowed for a failure class, first attempt included.
pub fn attempt_limit(classification: &Classification, config: &RetryConfig, allow_retry: bool) -> u32 {
    if !config.enabled || !allow_retry || !classification.retryable {
        return 1;
    }
    classification
        .max_retries
        .saturating_add(1)
        .min(config.max_attempts.max(1))
}

/// Decide whether the failed attempt number `attempt` (1-based) is retried.
pub fn decide(
    attempt: u32,
    classification: &Classification,
    config: &RetryConfig,
    allow_retry: bool,
) -> RetryDecision {
    if attempt < attempt_limit(classification, config, allow_retry) {
        RetryDecision::Retry(retry_delay(attempt, classification, config))
    } else {
        RetryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn exhaustion() -> Classification {
        Classification {
            category: ErrorCategory::ResourceExhaustion,
            retryable: true,
            multiplier: 4,
            max_retries: 3,
            retry_after: None,
        }
    }

    #[test]
    fn test_limit_is_min_of_rule_and_global_cap() {
        let mut config = RetryConfig::default();
        assert_eq!(attempt_limit(&exhaustion(), &config, true), 4);

        config.max_attempts = 2;
        assert_eq!(attempt_limit(&exhaustion(), &config, true), 2);
    }

    #[test]
    fn test_no_retry_paths() {
        let config = RetryConfig::default();
        assert_eq!(attempt_limit(&exhaustion(), &config, false), 1);

        let disabled = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        assert_eq!(attempt_limit(&exhaustion(), &disabled, true), 1);

        let terminal = Classification {
            retryable: false,
            ..exhaustion()
        };
        assert_eq!(decide(1, &terminal, &config, true), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_sequence() {
        let config = RetryConfig {
            jitter_ms: 0,
            base_delay_ms: 10,
            ..RetryConfig::default()
        };
        assert_eq!(
            decide(1, &exhaustion(), &config, true),
            RetryDecision::Retry(Duration::from_millis(40))
        );
        assert_eq!(
            decide(3, &exhaustion(), &config, true),
            RetryDecision::Retry(Duration::from_millis(160))
        );
        assert_eq!(decide(4, &exhaustion(), &config, true), RetryDecision::GiveUp);
    }
}
