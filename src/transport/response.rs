//! Responses and the rate-limit hints they carry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Fresh cache entry.
    Cache,
    /// Expired cache entry served because the backend is not healthy.
    StaleCache,
}

/// A buffered backend response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn rate_limit(&self) -> RateLimitHeaders {
        RateLimitHeaders::parse(&self.headers)
    }

    /// `Retry-After` as a delay, if present and non-zero.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.rate_limit().retry_after {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub(crate) fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }
}

/// Rate-limit headers advertised by the backend. Missing or invalid values are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Reset as sent by the server: epoch seconds or seconds from now.
    pub reset: u64,
    /// Retry-After in seconds.
    pub retry_after: u64,
}

/// Values above this are treated as epoch seconds rather than a delta.
const EPOCH_THRESHOLD_SECS: u64 = 1_000_000_000;

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: header_u64(headers, "x-ratelimit-limit"),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            reset: header_u64(headers, "x-ratelimit-reset"),
            retry_after: header_u64(headers, "retry-after"),
        }
    }

    /// True when the server advertised a limit and it is used up.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.remaining == 0
    }

    /// Time until the advertised reset, if it lies in the future.
    pub fn reset_in(&self) -> Option<Duration> {
        if self.reset == 0 {
            return None;
        }
        if self.reset < EPOCH_THRESHOLD_SECS {
            return Some(Duration::from_secs(self.reset));
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.reset
            .checked_sub(now)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}
