//! In-process rate-limit store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::rate_limit::{RateLimitDecision, RateLimitOptions, RateLimiter};

/// Counter state for one key. Times are milliseconds since the limiter's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub count: u32,
    pub blocked_until_ms: Option<u64>,
}

impl RateLimitWindow {
    fn fresh(start: u64, window_ms: u64) -> Self {
        Self {
            window_start_ms: start,
            window_end_ms: start + window_ms,
            count: 0,
            blocked_until_ms: None,
        }
    }

    /// Nothing left to enforce at `now`.
    fn is_idle(&self, now: u64) -> bool {
        match self.blocked_until_ms {
            Some(until) => now >= until,
            None => now >= self.window_end_ms,
        }
    }
}

/// Fixed-window limiter backed by a local map.
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
    epoch: Instant,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Snapshot of the window for `key`.
    pub fn window(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, key: &str, options: &RateLimitOptions, now: u64) -> RateLimitDecision {
        let window_ms = (options.window.as_millis() as u64).max(1);
        let bucket_start = now - now % window_ms;

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow::fresh(bucket_start, window_ms));

        if let Some(blocked_until) = window.blocked_until_ms {
            if now < blocked_until {
                return RateLimitDecision::deny(Duration::from_millis(blocked_until - now));
            }
            *window = RateLimitWindow::fresh(bucket_start, window_ms);
        }

        if now - window.window_start_ms >= window_ms {
            *window = RateLimitWindow::fresh(bucket_start, window_ms);
        }

        window.count = window.count.saturating_add(1);

        if window.count > options.max_requests {
            window.blocked_until_ms = Some(window.window_end_ms);
            tracing::debug!(key = %key, count = window.count, "Rate limit window exhausted");
            return RateLimitDecision::deny(Duration::from_millis(window.window_end_ms - now));
        }

        RateLimitDecision::allow(
            options.max_requests - window.count,
            Duration::from_millis(window.window_end_ms - now),
        )
    }

    fn sweep_at(&self, now: u64) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, w| !w.is_idle(now));
        before - windows.len()
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn is_allowed(&self, key: &str, options: &RateLimitOptions) -> RateLimitDecision {
        self.check(key, options, self.now_ms())
    }

    async fn reset(&self, key: &str) {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    async fn sweep(&self) -> usize {
        let removed = self.sweep_at(self.now_ms());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle rate-limit windows");
        }
        removed
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
