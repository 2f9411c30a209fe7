//! Gateway error taxonomy.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::transport::TransportError;

/// Failure category, decided by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection reset, refused, or timed out.
    Transport,
    /// 500 and unlisted 5xx.
    ServerUnavailable,
    /// 502 / 504 upstream problems.
    ServiceError,
    /// 503 overload.
    ResourceExhaustion,
    /// 429.
    RateLimited,
    /// Other 4xx and malformed requests.
    ClientError,
    /// Never attempted: health policy vetoed a non-critical read.
    Skipped,
    /// Rejected by an open circuit.
    CircuitOpen,
    /// The caller cancelled the call.
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::ServerUnavailable => "server_unavailable",
            ErrorCategory::ServiceError => "service_error",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::Skipped => "skipped",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What actually went wrong on the last attempt.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("backend returned {status}")]
    Status {
        status: StatusCode,
        body: Bytes,
        retry_after: Option<Duration>,
    },

    #[error("circuit open for '{key}'")]
    CircuitOpen { key: String },

    #[error("backend unhealthy, non-critical read skipped")]
    HealthVeto,

    #[error("cancelled by caller")]
    Cancelled,
}

/// Error surfaced to callers once retries are exhausted or not allowed.
#[derive(Debug, Clone, Error)]
#[error("{category} after {attempts} attempt(s): {cause}")]
pub struct GatewayError {
    pub category: ErrorCategory,
    pub attempts: u32,
    #[source]
    pub cause: FailureCause,
}

impl GatewayError {
    pub fn new(category: ErrorCategory, attempts: u32, cause: FailureCause) -> Self {
        Self {
            category,
            attempts,
            cause,
        }
    }

    /// HTTP status of the final attempt, when the backend answered.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.cause {
            FailureCause::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure assembling a gateway from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid default header '{name}'")]
    Header { name: String },

    #[error("rate limiter backend: {0}")]
    RateLimiter(#[from] redis::RedisError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::new(
            ErrorCategory::ResourceExhaustion,
            4,
            FailureCause::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: Bytes::new(),
                retry_after: None,
            },
        );
        assert_eq!(
            err.to_string(),
            "resource_exhaustion after 4 attempt(s): backend returned 503 Service Unavailable"
        );
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_transport_cause_is_transparent() {
        let err = GatewayError::new(
            ErrorCategory::Transport,
            6,
            TransportError::ConnectionRefused("127.0.0.1:1".into()).into(),
        );
        assert!(err.to_string().ends_with("connection refused: 127.0.0.1:1"));
        assert_eq!(err.status(), None);
    }
}
