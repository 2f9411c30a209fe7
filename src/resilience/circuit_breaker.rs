//! Circuit breaker for endpoint isolation.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed broken, calls fail fast
//! - Half-Open: a single probe call is allowed through
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: checked on the next call once reset timeout has elapsed
//! Half-Open → Closed: probe succeeds (counter reset)
//! Half-Open → Open: probe fails (timeout restarts)
//! ```
//!
//! # Design Decisions
//! - Per-key breaker (not global)
//! - No background timer: Open → Half-Open is evaluated lazily
//! - Single probe in Half-Open; concurrent callers are rejected until it settles

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Circuit state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Failure bookkeeping for one key.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub state: CircuitState,
    probe_in_flight: bool,
}

impl Default for FailureRecord {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_at: None,
            state: CircuitState::Closed,
            probe_in_flight: false,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the wrapped function.
    Open { key: String, retry_in: Duration },
    /// The wrapped function failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { key, retry_in } => {
                write!(f, "circuit open for '{}', retry in {:?}", key, retry_in)
            }
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// How an error from the wrapped call counts against its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// The endpoint failed.
    Failure,
    /// The endpoint answered; the error is not its fault.
    Answered,
    /// Says nothing about the endpoint, e.g. the caller gave up.
    Inconclusive,
}

/// Callback invoked on every state change: `(key, from, to)`.
pub type TransitionListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Per-key circuit breaker.
pub struct CircuitBreaker {
    records: DashMap<String, FailureRecord>,
    enabled: bool,
    threshold: u32,
    reset_timeout: Duration,
    listener: Option<TransitionListener>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            records: DashMap::new(),
            enabled: config.enabled,
            threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            listener: None,
        }
    }

    /// Register a state-change listener.
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Run `f` under the breaker; every `Err` counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, key: &str, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(key, |_| ErrorVerdict::Failure, f).await
    }

    /// Run `f` under the breaker; `judge` decides how each error counts.
    pub async fn execute_with<F, Fut, T, E, P>(
        &self,
        key: &str,
        judge: P,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> ErrorVerdict,
    {
        if !self.enabled {
            return f().await.map_err(BreakerError::Inner);
        }

        let mut guard = match self.admit(key) {
            Ok(guard) => guard,
            Err(retry_in) => {
                return Err(BreakerError::Open {
                    key: key.to_string(),
                    retry_in,
                })
            }
        };
        let result = f().await;

        match &result {
            Ok(_) => {
                guard.settled = true;
                self.on_success(key);
            }
            Err(e) => match judge(e) {
                ErrorVerdict::Failure => {
                    guard.settled = true;
                    self.on_failure(key);
                }
                ErrorVerdict::Answered => {
                    guard.settled = true;
                    self.on_success(key);
                }
                // Guard drop releases a probe slot without a verdict.
                ErrorVerdict::Inconclusive => {}
            },
        }

        result.map_err(BreakerError::Inner)
    }

    /// Current state of `key` (Closed if never seen).
    pub fn state(&self, key: &str) -> CircuitState {
        self.records
            .get(key)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn record(&self, key: &str) -> Option<FailureRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Keys whose circuit is not closed.
    pub fn open_circuits(&self) -> Vec<(String, CircuitState)> {
        self.records
            .iter()
            .filter(|r| r.state != CircuitState::Closed)
            .map(|r| (r.key().clone(), r.state))
            .collect()
    }

    /// Force `key` back to Closed.
    pub fn reset(&self, key: &str) {
        let previous = self.records.remove(key).map(|(_, r)| r.state);
        if let Some(from) = previous.filter(|s| *s != CircuitState::Closed) {
            self.notify(key, from, CircuitState::Closed);
        }
    }

    /// Admit a call, or return how long until the circuit may be probed.
    fn admit(&self, key: &str) -> Result<ProbeGuard<'_>, Duration> {
        let mut transition = None;
        let outcome = {
            let mut record = self.records.entry(key.to_string()).or_default();
            match record.state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => {
                    let elapsed = record
                        .last_failure_at
                        .map(|at| at.elapsed())
                        .unwrap_or(self.reset_timeout);
                    if elapsed >= self.reset_timeout {
                        record.state = CircuitState::HalfOpen;
                        record.probe_in_flight = true;
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        Ok(true)
                    } else {
                        Err(self.reset_timeout - elapsed)
                    }
                }
                CircuitState::HalfOpen => {
                    if record.probe_in_flight {
                        Err(Duration::ZERO)
                    } else {
                        record.probe_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            tracing::info!(key = %key, "Circuit half-open, allowing probe");
            self.notify(key, from, to);
        }

        let probe = outcome.inspect_err(|retry_in| {
            tracing::debug!(key = %key, retry_in = ?retry_in, "Circuit open, rejecting call");
        })?;

        Ok(ProbeGuard {
            breaker: self,
            key: key.to_string(),
            probe,
            settled: false,
        })
    }

    fn on_success(&self, key: &str) {
        let previous = {
            let mut record = self.records.entry(key.to_string()).or_default();
            let previous = record.state;
            record.state = CircuitState::Closed;
            record.consecutive_failures = 0;
            record.probe_in_flight = false;
            previous
        };
        if previous != CircuitState::Closed {
            tracing::info!(key = %key, "Circuit closed after successful probe");
            self.notify(key, previous, CircuitState::Closed);
        }
    }

    fn on_failure(&self, key: &str) {
        let (previous, next, failures) = {
            let mut record = self.records.entry(key.to_string()).or_default();
            let previous = record.state;
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_failure_at = Some(Instant::now());
            record.probe_in_flight = false;
            if previous == CircuitState::HalfOpen || record.consecutive_failures >= self.threshold {
                record.state = CircuitState::Open;
            }
            (previous, record.state, record.consecutive_failures)
        };
        if previous != next {
            tracing::warn!(
                key = %key,
                consecutive_failures = failures,
                reset_timeout = ?self.reset_timeout,
                "Circuit opened"
            );
            self.notify(key, previous, next);
        }
    }

    fn notify(&self, key: &str, from: CircuitState, to: CircuitState) {
        if let Some(listener) = &self.listener {
            listener(key, from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("keys", &self.records.len())
            .finish()
    }
}

/// Releases a half-open probe slot if the call is dropped before settling.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    key: String,
    probe: bool,
    settled: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            if let Some(mut record) = self.breaker.records.get_mut(&self.key) {
                record.probe_in_flight = false;
            }
        }
    }
}
