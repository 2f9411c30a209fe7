//! Shared rate-limit store on Redis.
//!
//! Keys:
//! - `{prefix}:{key}:{window_start_ms}`: request counter, expires with the window
//! - `{prefix}:{key}:blocked`: present while the key is blocked
//!
//! Window boundaries use wall-clock epoch milliseconds so every instance
//! buckets identically.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tokio::sync::Mutex;

use crate::rate_limit::{RateLimitDecision, RateLimitOptions, RateLimiter};

/// Fixed-window limiter shared by all instances through Redis.
pub struct RedisRateLimiter {
    client: Client,
    connection: Mutex<Option<ConnectionManager>>,
    key_prefix: String,
    command_timeout: Duration,
}

impl RedisRateLimiter {
    /// Create a limiter; the connection is established lazily on first use.
    pub fn new(url: &str, key_prefix: &str, command_timeout: Duration) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Mutex::new(None),
            key_prefix: key_prefix.to_string(),
            command_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        tracing::info!(prefix = %self.key_prefix, "Connected to shared rate-limit store");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    fn counter_key(&self, key: &str, window_start: u64) -> String {
        format!("{}:{}:{}", self.key_prefix, key, window_start)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}:{}:blocked", self.key_prefix, key)
    }

    async fn check(&self, key: &str, options: &RateLimitOptions) -> Result<RateLimitDecision, RedisError> {
        let now = epoch_ms();
        let window_ms = (options.window.as_millis() as u64).max(1);
        let window_start = now - now % window_ms;
        let window_end = window_start + window_ms;

        let mut conn = self.connection().await?;

        let block_key = self.block_key(key);
        let blocked_ttl: i64 = redis::cmd("PTTL")
            .arg(&block_key)
            .query_async(&mut conn)
            .await?;
        if blocked_ttl > 0 {
            return Ok(RateLimitDecision::deny(Duration::from_millis(blocked_ttl as u64)));
        }

        // Increment and expire in one MULTI/EXEC round-trip.
        let counter_key = self.counter_key(key, window_start);
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&counter_key, 1u64)
            .pexpire(&counter_key, window_ms as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        let reset_in = Duration::from_millis(window_end.saturating_sub(now).max(1));

        if count > u64::from(options.max_requests) {
            let _: () = redis::cmd("SET")
                .arg(&block_key)
                .arg(window_end)
                .arg("PX")
                .arg(reset_in.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            tracing::debug!(key = %key, count, "Shared rate limit window exhausted");
            return Ok(RateLimitDecision::deny(reset_in));
        }

        let remaining = u64::from(options.max_requests).saturating_sub(count) as u32;
        Ok(RateLimitDecision::allow(remaining, reset_in))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_allowed(&self, key: &str, options: &RateLimitOptions) -> RateLimitDecision {
        match tokio::time::timeout(self.command_timeout, self.check(key, options)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Rate-limit store unavailable, failing open");
                RateLimitDecision::allow(options.max_requests, options.window)
            }
            Err(_) => {
                tracing::warn!(
                    key = %key,
                    timeout = ?self.command_timeout,
                    "Rate-limit store timed out, failing open"
                );
                RateLimitDecision::allow(options.max_requests, options.window)
            }
        }
    }

    async fn reset(&self, key: &str) {
        let result = async {
            let mut conn = self.connection().await?;
            let owned = format!("{}:{}:", self.key_prefix, key);
            let pattern = format!("{}*", escape_glob(&owned));
            let mut cursor = 0u64;
            let mut removed = 0u64;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await?;
                let keys: Vec<String> = keys
                    .into_iter()
                    .filter(|k| is_limiter_key(k, &owned))
                    .collect();
                if !keys.is_empty() {
                    let n: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                    removed += n;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, RedisError>(removed)
        };
        match tokio::time::timeout(self.command_timeout, result).await {
            Ok(Ok(removed)) => tracing::debug!(key = %key, removed, "Reset shared rate limit"),
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "Failed to reset shared rate limit"),
            Err(_) => tracing::warn!(key = %key, "Timed out resetting shared rate limit"),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Escape Redis glob metacharacters so a key matches only itself.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// True for this key's counters and block marker, not a longer key sharing
/// the prefix (`/a:b` under `/a`).
fn is_limiter_key(candidate: &str, owned_prefix: &str) -> bool {
    match candidate.strip_prefix(owned_prefix) {
        Some("blocked") => true,
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
