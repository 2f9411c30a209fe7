//! Timeout enforcement.
//!
//! Every attempt runs against a combined signal: the caller's cancellation
//! token and an internal deadline. Whichever fires first drops the in-flight
//! future, aborting the transport call.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TimeoutConfig;
use crate::transport::RequestFlags;

/// Why an attempt did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptAbort {
    TimedOut(Duration),
    Cancelled,
}

/// Timeout for one attempt: caller override, else shrunk while degraded.
pub fn attempt_timeout(flags: &RequestFlags, shrink: bool, config: &TimeoutConfig) -> Duration {
    if let Some(timeout) = flags.timeout_override {
        return timeout;
    }
    if shrink {
        Duration::from_millis(config.degraded_request_ms.min(config.request_ms))
    } else {
        Duration::from_millis(config.request_ms)
    }
}

/// Run `fut` until it completes, the deadline passes, or `cancel` fires.
pub async fn with_deadline<F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, AttemptAbort>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AttemptAbort::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| AttemptAbort::TimedOut(timeout)),
    }
}
