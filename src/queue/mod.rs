//! Serialized dispatch of outbound attempts.
//!
//! # Responsibilities
//! - Admit attempts strictly in arrival order, one at a time
//! - Hold the head attempt until the rate limiter allows its key
//! - Pause everything while the backend advertises an exhausted limit
//!
//! # Design Decisions
//! - FIFO comes from `tokio::sync::Mutex`, which wakes waiters in order
//! - The head keeps the lock while it waits for its window, so one exhausted
//!   key stalls every key queued behind it
//! - Waiting is cancellable; a cancelled waiter leaves the queue without running

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::observability::{metrics, MetricsCollector};
use crate::rate_limit::{RateLimitOptions, RateLimiter};

/// The caller cancelled while the attempt was still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled while queued")]
pub struct QueueCancelled;

pub struct RequestQueue {
    limiter: Arc<dyn RateLimiter>,
    options: RateLimitOptions,
    enabled: bool,
    turn: tokio::sync::Mutex<()>,
    depth: AtomicUsize,
    paused_until: Mutex<Option<Instant>>,
    metrics: Arc<MetricsCollector>,
}

/// Keeps the depth gauge honest when a waiter is dropped or cancelled.
struct DepthGuard<'a>(&'a AtomicUsize);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        let now = depth.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_queue_depth(now);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_queue_depth(now);
    }
}

impl RequestQueue {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        options: RateLimitOptions,
        enabled: bool,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            limiter,
            options,
            enabled,
            turn: tokio::sync::Mutex::new(()),
            depth: AtomicUsize::new(0),
            paused_until: Mutex::new(None),
            metrics,
        }
    }

    /// Attempts waiting or running.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Hold all dispatch until `until`. Later deadlines win.
    pub fn pause_until(&self, until: Instant) {
        let mut paused = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        if paused.map_or(true, |current| until > current) {
            *paused = Some(until);
            tracing::info!(
                resume_in = ?until.saturating_duration_since(Instant::now()),
                "Backend rate limit exhausted, pausing queue"
            );
        }
    }

    /// Wait for this attempt's turn and rate-limit slot, then run `job`.
    pub async fn enqueue<F, Fut, T>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<T, QueueCancelled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _depth = DepthGuard::enter(&self.depth);

        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueCancelled),
            turn = self.turn.lock() => turn,
        };

        self.wait_for_slot(key, cancel).await?;
        Ok(job().await)
    }

    async fn wait_for_slot(&self, key: &str, cancel: &CancellationToken) -> Result<(), QueueCancelled> {
        loop {
            let paused = *self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(until) = paused {
                if until > Instant::now() {
                    metrics::record_rate_limited("server");
                    sleep_or_cancel(until, cancel).await?;
                    continue;
                }
                let mut slot = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
                if *slot == Some(until) {
                    *slot = None;
                }
            }

            if !self.enabled {
                return Ok(());
            }

            let decision = self.limiter.is_allowed(key, &self.options).await;
            if decision.allowed {
                return Ok(());
            }

            self.metrics.record_rate_limit_hit();
            metrics::record_rate_limited("client");
            tracing::warn!(
                key = %key,
                retry_after = ?decision.retry_after,
                queued = self.depth(),
                "Rate limit reached, queue waiting"
            );
            let wait = decision.retry_after.max(Duration::from_millis(1));
            sleep_or_cancel(Instant::now() + wait, cancel).await?;
        }
    }
}

async fn sleep_or_cancel(until: Instant, cancel: &CancellationToken) -> Result<(), QueueCancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueueCancelled),
        _ = tokio::time::sleep_until(until) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::MemoryRateLimiter;

    fn queue(max_requests: u32) -> Arc<RequestQueue> {
        Arc::new(RequestQueue::new(
            Arc::new(MemoryRateLimiter::new()),
            RateLimitOptions {
                window: Duration::from_millis(1_000),
                max_requests,
            },
            true,
            Arc::new(MetricsCollector::default()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_head_stalls_other_keys() {
        let queue = queue(1);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        queue.enqueue("/a", &cancel, || async {}).await.unwrap();

        let q = queue.clone();
        let c = cancel.clone();
        let a = tokio::spawn(async move { q.enqueue("/a", &c, || async { Instant::now() }).await });
        tokio::task::yield_now().await;

        let q = queue.clone();
        let c = cancel.clone();
        let b = tokio::spawn(async move { q.enqueue("/b", &c, || async { Instant::now() }).await });

        let a_done = a.await.unwrap().unwrap();
        let b_done = b.await.unwrap().unwrap();

        // /b has its own budget but still waited for /a's window to reset.
        assert!(a_done - start >= Duration::from_millis(1_000));
        assert!(b_done >= a_done);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_in_arrival_order() {
        let queue = queue(100);
        let cancel = CancellationToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let q = queue.clone();
            let c = cancel.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue("/k", &c, || async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    order.lock().unwrap().push(i);
                })
                .await
            }));
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_rate_limited() {
        let queue = queue(1);
        let cancel = CancellationToken::new();
        queue.enqueue("/a", &cancel, || async {}).await.unwrap();

        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c.cancel();
        });
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let result = queue
            .enqueue("/a", &cancel, || async move { *flag.lock().unwrap() = true })
            .await;
        assert_eq!(result, Err(QueueCancelled));
        assert!(!*ran.lock().unwrap());
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_pause_holds_dispatch() {
        let queue = queue(100);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        queue.pause_until(start + Duration::from_secs(2));
        // Earlier deadline does not shorten the pause.
        queue.pause_until(start + Duration::from_secs(1));

        let ran_at = queue
            .enqueue("/a", &cancel, || async { Instant::now() })
            .await
            .unwrap();
        assert_eq!(ran_at - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_never_waits() {
        let queue = RequestQueue::new(
            Arc::new(MemoryRateLimiter::new()),
            RateLimitOptions {
                window: Duration::from_millis(1_000),
                max_requests: 1,
            },
            false,
            Arc::new(MetricsCollector::default()),
        );
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..5 {
            queue.enqueue("/a", &cancel, || async {}).await.unwrap();
        }
        assert_eq!(Instant::now(), start);
    }
}
