//! Failure classification.
//!
//! Pure, table-driven mapping from a failure to its category and retry
//! parameters. Precedence: transport errors, then 500, 502, 503, 504, other
//! 5xx, 429, other 4xx.

use std::time::Duration;

use reqwest::StatusCode;

use crate::config::{RetryRule, RetryRules};
use crate::error::{ErrorCategory, FailureCause};

/// Outcome of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub multiplier: u32,
    pub max_retries: u32,
    /// Server-mandated delay (429 with `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl Classification {
    fn retryable(category: ErrorCategory, rule: RetryRule) -> Self {
        Self {
            category,
            retryable: true,
            multiplier: rule.multiplier,
            max_retries: rule.max_retries,
            retry_after: None,
        }
    }

    fn terminal(category: ErrorCategory) -> Self {
        Self {
            category,
            retryable: false,
            multiplier: 1,
            max_retries: 0,
            retry_after: None,
        }
    }
}

/// Classify a failure against the retry rule table.
pub fn classify(cause: &FailureCause, rules: &RetryRules) -> Classification {
    match cause {
        FailureCause::Transport(e) if e.is_network() => {
            Classification::retryable(ErrorCategory::Transport, rules.transport)
        }
        FailureCause::Transport(_) => Classification::terminal(ErrorCategory::ClientError),
        FailureCause::Status {
            status,
            retry_after,
            ..
        } => classify_status(*status, *retry_after, rules),
        FailureCause::CircuitOpen { .. } => Classification::terminal(ErrorCategory::CircuitOpen),
        FailureCause::HealthVeto => Classification::terminal(ErrorCategory::Skipped),
        FailureCause::Cancelled => Classification::terminal(ErrorCategory::Cancelled),
    }
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    rules: &RetryRules,
) -> Classification {
    match status {
        StatusCode::INTERNAL_SERVER_ERROR => {
            Classification::retryable(ErrorCategory::ServerUnavailable, rules.internal_server_error)
        }
        StatusCode::BAD_GATEWAY => {
            Classification::retryable(ErrorCategory::ServiceError, rules.bad_gateway)
        }
        StatusCode::SERVICE_UNAVAILABLE => {
            Classification::retryable(ErrorCategory::ResourceExhaustion, rules.service_unavailable)
        }
        StatusCode::GATEWAY_TIMEOUT => {
            Classification::retryable(ErrorCategory::ServiceError, rules.gateway_timeout)
        }
        s if s.is_server_error() => {
            Classification::retryable(ErrorCategory::ServerUnavailable, rules.other_server_error)
        }
        StatusCode::TOO_MANY_REQUESTS => Classification {
            retry_after,
            ..Classification::retryable(ErrorCategory::RateLimited, rules.rate_limited)
        },
        _ => Classification::terminal(ErrorCategory::ClientError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use bytes::Bytes;

    fn status(code: u16, retry_after: Option<Duration>) -> FailureCause {
        FailureCause::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: Bytes::new(),
            retry_after,
        }
    }

    #[test]
    fn test_status_table() {
        let rules = RetryRules::default();
        let cases = [
            (500, ErrorCategory::ServerUnavailable, 2, 2),
            (502, ErrorCategory::ServiceError, 2, 4),
            (503, ErrorCategory::ResourceExhaustion, 4, 3),
            (504, ErrorCategory::ServiceError, 3, 2),
            (507, ErrorCategory::ServerUnavailable, 2, 2),
        ];
        for (code, category, multiplier, max_retries) in cases {
            let c = classify(&status(code, None), &rules);
            assert_eq!(c.category, category, "status {}", code);
            assert!(c.retryable);
            assert_eq!(c.multiplier, multiplier, "status {}", code);
            assert_eq!(c.max_retries, max_retries, "status {}", code);
        }
    }

    #[test]
    fn test_transport_errors_are_generous() {
        let rules = RetryRules::default();
        for err in [
            TransportError::ConnectionReset("peer".into()),
            TransportError::ConnectionRefused("127.0.0.1:1".into()),
            TransportError::Timeout(Duration::from_secs(5)),
        ] {
            let c = classify(&FailureCause::Transport(err), &rules);
            assert_eq!(c.category, ErrorCategory::Transport);
            assert!(c.retryable);
            assert_eq!((c.multiplier, c.max_retries), (3, 5));
        }

        let c = classify(
            &FailureCause::Transport(TransportError::InvalidRequest("bad url".into())),
            &rules,
        );
        assert_eq!(c.category, ErrorCategory::ClientError);
        assert!(!c.retryable);
    }

    #[test]
    fn test_429_is_always_retryable() {
        let rules = RetryRules::default();
        let first = classify(&status(429, Some(Duration::from_secs(7))), &rules);
        // No hidden state: classifying other failures in between changes nothing.
        let _ = classify(&status(404, None), &rules);
        let _ = classify(&status(503, None), &rules);
        let second = classify(&status(429, Some(Duration::from_secs(7))), &rules);

        assert_eq!(first, second);
        assert!(first.retryable);
        assert_eq!(first.category, ErrorCategory::RateLimited);
        assert_eq!(first.retry_after, Some(Duration::from_secs(7)));

        let without_header = classify(&status(429, None), &rules);
        assert!(without_header.retryable);
        assert_eq!(without_header.retry_after, None);
    }

    #[test]
    fn test_other_4xx_not_retryable() {
        let rules = RetryRules::default();
        for code in [400, 401, 403, 404, 409, 422] {
            let c = classify(&status(code, None), &rules);
            assert_eq!(c.category, ErrorCategory::ClientError);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_local_rejections_are_terminal() {
        let rules = RetryRules::default();
        let open = classify(&FailureCause::CircuitOpen { key: "/a".into() }, &rules);
        assert_eq!(open.category, ErrorCategory::CircuitOpen);
        assert!(!open.retryable);
        assert_eq!(
            classify(&FailureCause::HealthVeto, &rules).category,
            ErrorCategory::Skipped
        );
        assert_eq!(
            classify(&FailureCause::Cancelled, &rules).category,
            ErrorCategory::Cancelled
        );
    }
}
