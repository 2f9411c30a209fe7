//! The call pipeline: health policy, cache, queued attempts and retries.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ErrorCategory, FailureCause, GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::health::DegradationPolicy;
use crate::observability::metrics;
use crate::queue::QueueCancelled;
use crate::resilience::retries::decide;
use crate::resilience::timeouts::{attempt_timeout, with_deadline, AttemptAbort};
use crate::resilience::{classify, BreakerError, ErrorVerdict, RetryDecision};
use crate::transport::{ApiResponse, RateLimitHeaders, RequestDescriptor, TransportError};

impl Gateway {
    /// Execute one logical call.
    pub async fn call(&self, request: RequestDescriptor) -> GatewayResult<ApiResponse> {
        self.call_with_cancel(request, CancellationToken::new()).await
    }

    /// Execute one logical call; cancelling `cancel` aborts waiting, backoff
    /// and any in-flight attempt.
    pub async fn call_with_cancel(
        &self,
        request: RequestDescriptor,
        cancel: CancellationToken,
    ) -> GatewayResult<ApiResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "gateway_call",
            request_id = %request_id,
            method = %request.method,
            endpoint = %request.endpoint,
        );
        self.run_call(&request, &request_id, &cancel)
            .instrument(span)
            .await
    }

    pub async fn get(&self, endpoint: &str) -> GatewayResult<ApiResponse> {
        self.call(RequestDescriptor::get(endpoint)).await
    }

    /// POST `body` serialized as JSON.
    pub async fn post_json<B: Serialize>(&self, endpoint: &str, body: &B) -> GatewayResult<ApiResponse> {
        let value = serde_json::to_value(body).map_err(|e| {
            GatewayError::new(
                ErrorCategory::ClientError,
                0,
                TransportError::InvalidRequest(e.to_string()).into(),
            )
        })?;
        self.call(RequestDescriptor::post(endpoint).json(value)).await
    }

    async fn run_call(
        &self,
        request: &RequestDescriptor,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<ApiResponse> {
        let started = Instant::now();
        let method = request.method.as_str();
        let health = self.health.status();
        let policy = DegradationPolicy::for_state(health.status);

        if policy.show_notice {
            tracing::debug!(health = health.status.as_str(), "Backend not healthy");
        }

        let cache_key = request.cache_key();
        let cacheable = request.is_read() && request.flags.use_cache && self.cache.is_enabled();

        if cacheable && policy.enable_cache {
            if let Some(hit) = self.cache.get(&cache_key) {
                self.metrics.record_cache_hit();
                metrics::record_cache("hit");
                metrics::record_request(method, "cache", started);
                return Ok(hit);
            }
            self.metrics.record_cache_miss();
            metrics::record_cache("miss");
        }

        if cacheable && policy.allow_stale_fallback {
            if let Some((stale, age)) = self.cache.get_stale(&cache_key) {
                tracing::warn!(
                    key = %cache_key,
                    age_secs = age.as_secs(),
                    health = health.status.as_str(),
                    "Serving stale cached response instead of calling backend"
                );
                metrics::record_cache("stale");
                metrics::record_request(method, "stale_cache", started);
                return Ok(stale);
            }
        }

        if request.is_read() && !request.flags.critical && policy.suppress_non_critical_reads {
            tracing::warn!(
                failures = health.consecutive_failures,
                "Backend unhealthy, skipping non-critical read"
            );
            self.metrics.record_failure(ErrorCategory::Skipped, None);
            metrics::record_request(method, ErrorCategory::Skipped.as_str(), started);
            return Err(GatewayError::new(ErrorCategory::Skipped, 0, FailureCause::HealthVeto));
        }

        let config = self.config.load_full();
        let timeout = attempt_timeout(&request.flags, policy.shrink_timeout, &config.timeouts);
        let mut attempt = 0u32;
        let mut last_failure: Option<(ErrorCategory, FailureCause)> = None;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();

            match self.attempt(request, request_id, timeout, cancel).await {
                Ok(response) => {
                    if cacheable {
                        self.cache.insert(&cache_key, response.clone());
                        metrics::record_cache("store");
                    }
                    self.metrics.record_success(attempt_started.elapsed());
                    metrics::record_request(method, "success", started);
                    tracing::debug!(status = %response.status, attempts = attempt, "Call completed");
                    return Ok(response);
                }
                Err(cause) => {
                    // A circuit that opens mid-retry must not hide why it opened.
                    if let FailureCause::CircuitOpen { key } = &cause {
                        if let Some((category, last)) = last_failure.take() {
                            tracing::warn!(key = %key, "Circuit opened while retrying, giving up");
                            let attempts = attempt - 1;
                            return Err(self.give_up(category, attempts, last, None, method, started));
                        }
                    }

                    let classification = classify(&cause, &config.retries.rules);
                    let category = classification.category;

                    match decide(attempt, &classification, &config.retries, request.flags.allow_retry) {
                        RetryDecision::Retry(delay) => {
                            tracing::warn!(
                                attempt,
                                category = category.as_str(),
                                delay = ?delay,
                                error = %cause,
                                "Attempt failed, retrying"
                            );
                            metrics::record_retry(category.as_str());
                            last_failure = Some((category, cause));
                            if sleep_or_cancel(delay, cancel).await.is_err() {
                                return Err(self.give_up(
                                    ErrorCategory::Cancelled,
                                    attempt,
                                    FailureCause::Cancelled,
                                    None,
                                    method,
                                    started,
                                ));
                            }
                        }
                        RetryDecision::GiveUp => {
                            let elapsed = match &cause {
                                FailureCause::CircuitOpen { .. } | FailureCause::Cancelled => None,
                                _ => Some(attempt_started.elapsed()),
                            };
                            return Err(self.give_up(category, attempt, cause, elapsed, method, started));
                        }
                    }
                }
            }
        }
    }

    fn give_up(
        &self,
        category: ErrorCategory,
        attempts: u32,
        cause: FailureCause,
        elapsed: Option<Duration>,
        method: &str,
        started: Instant,
    ) -> GatewayError {
        match category {
            ErrorCategory::ClientError | ErrorCategory::Cancelled => tracing::info!(
                category = category.as_str(),
                attempts,
                error = %cause,
                "Call failed"
            ),
            _ => tracing::error!(
                category = category.as_str(),
                attempts,
                error = %cause,
                "Call failed"
            ),
        }
        self.metrics.record_failure(category, elapsed);
        metrics::record_request(method, category.as_str(), started);
        GatewayError::new(category, attempts, cause)
    }

    /// One queued, circuit-guarded network attempt.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        request_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, FailureCause> {
        let outbound = request.to_outbound(&self.base_url, &self.default_headers, request_id)?;
        let key = request.endpoint_key();

        let queued = self
            .queue
            .enqueue(key, cancel, move || {
                self.breaker.execute_with(key, circuit_verdict, move || async move {
                    let sent = with_deadline(self.transport.send(outbound), timeout, cancel).await;
                    match sent {
                        Ok(Ok(response)) => {
                            self.observe_rate_limit_hints(&response.headers);
                            if response.is_success() {
                                Ok(response)
                            } else {
                                if response.status == StatusCode::TOO_MANY_REQUESTS {
                                    self.metrics.record_rate_limit_hit();
                                    metrics::record_rate_limited("server");
                                }
                                Err(FailureCause::Status {
                                    status: response.status,
                                    retry_after: response.retry_after(),
                                    body: response.body,
                                })
                            }
                        }
                        Ok(Err(e)) => Err(FailureCause::Transport(e)),
                        Err(AttemptAbort::TimedOut(after)) => {
                            Err(FailureCause::Transport(TransportError::Timeout(after)))
                        }
                        Err(AttemptAbort::Cancelled) => Err(FailureCause::Cancelled),
                    }
                })
            })
            .await;

        match queued {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(BreakerError::Inner(cause))) => Err(cause),
            Ok(Err(BreakerError::Open { key, retry_in })) => {
                tracing::warn!(key = %key, retry_in = ?retry_in, "Circuit open, call rejected");
                Err(FailureCause::CircuitOpen { key })
            }
            Err(QueueCancelled) => Err(FailureCause::Cancelled),
        }
    }

    /// Pause the queue when the backend says its limit is used up.
    fn observe_rate_limit_hints(&self, headers: &HeaderMap) {
        let hints = RateLimitHeaders::parse(headers);
        if !hints.is_exhausted() {
            return;
        }
        if let Some(reset_in) = hints.reset_in() {
            if reset_in > self.max_server_pause {
                tracing::warn!(
                    advertised = ?reset_in,
                    ceiling = ?self.max_server_pause,
                    "Server rate-limit reset beyond ceiling, clamping pause"
                );
            }
            self.queue
                .pause_until(Instant::now() + reset_in.min(self.max_server_pause));
        }
    }
}

/// Only network failures and 5xx count against an endpoint's circuit.
fn circuit_verdict(cause: &FailureCause) -> ErrorVerdict {
    match cause {
        FailureCause::Transport(e) if e.is_network() => ErrorVerdict::Failure,
        FailureCause::Status { status, .. } if status.is_server_error() => ErrorVerdict::Failure,
        FailureCause::Cancelled => ErrorVerdict::Inconclusive,
        _ => ErrorVerdict::Answered,
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
