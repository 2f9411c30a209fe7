//! In-process usage metrics with threshold alerting.
//!
//! # Responsibilities
//! - Lifetime counters: requests, successes, failures by category, cache, breaker, rate limit
//! - Rolling average over the last 100 response times
//! - One-hour alert window; each alert kind fires at most once per window
//! - Fan raised alerts out to subscribers

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::AlertConfig;
use crate::error::ErrorCategory;
use crate::observability::alerts::{self, Alert, AlertKind, WindowCounts};
use crate::observability::metrics;

const RESPONSE_TIME_SAMPLES: usize = 100;
const RECENT_ALERTS: usize = 50;
const ALERT_WINDOW: Duration = Duration::from_secs(3_600);

struct AlertWindow {
    started_at: Instant,
    started_at_wall: SystemTime,
    requests: u64,
    failures: u64,
    circuit_trips: u64,
    rate_limit_hits: u64,
    fired: HashSet<AlertKind>,
}

impl AlertWindow {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_wall: SystemTime::now(),
            requests: 0,
            failures: 0,
            circuit_trips: 0,
            rate_limit_hits: 0,
            fired: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    failures_by_category: BTreeMap<&'static str, u64>,
    cache_hits: u64,
    cache_misses: u64,
    circuit_breaker_trips: u64,
    rate_limit_hits: u64,
}

struct CollectorState {
    counters: Counters,
    response_times_ms: VecDeque<u64>,
    window: AlertWindow,
    recent_alerts: VecDeque<Alert>,
}

impl CollectorState {
    fn average_response_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            0.0
        } else {
            self.response_times_ms.iter().sum::<u64>() as f64 / self.response_times_ms.len() as f64
        }
    }
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub failures_by_category: BTreeMap<&'static str, u64>,
    pub error_rate_percent: f64,
    pub average_response_time_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate_percent: f64,
    pub circuit_breaker_trips: u64,
    pub rate_limit_hits: u64,
    pub window_started_at: SystemTime,
    pub window_requests: u64,
    pub window_failures: u64,
    pub recent_alerts: Vec<Alert>,
}

pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    thresholds: ArcSwap<AlertConfig>,
    alerts_tx: broadcast::Sender<Alert>,
}

impl MetricsCollector {
    pub fn new(thresholds: AlertConfig) -> Self {
        let (alerts_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(CollectorState {
                counters: Counters::default(),
                response_times_ms: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
                window: AlertWindow::new(),
                recent_alerts: VecDeque::with_capacity(RECENT_ALERTS),
            }),
            thresholds: ArcSwap::from_pointee(thresholds),
            alerts_tx,
        }
    }

    /// Replace alert thresholds; takes effect on the next event.
    pub fn set_thresholds(&self, thresholds: AlertConfig) {
        self.thresholds.store(Arc::new(thresholds));
    }

    /// Stream of alerts raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.update(|state| {
            state.counters.total_requests += 1;
            state.counters.success_count += 1;
            state.window.requests += 1;
            push_sample(&mut state.response_times_ms, elapsed);
        });
    }

    /// A failed call. `elapsed` is `None` when no network attempt was made.
    pub fn record_failure(&self, category: ErrorCategory, elapsed: Option<Duration>) {
        self.update(|state| {
            state.counters.total_requests += 1;
            state.counters.failure_count += 1;
            *state
                .counters
                .failures_by_category
                .entry(category.as_str())
                .or_insert(0) += 1;
            state.window.requests += 1;
            state.window.failures += 1;
            if let Some(elapsed) = elapsed {
                push_sample(&mut state.response_times_ms, elapsed);
            }
        });
    }

    pub fn record_cache_hit(&self) {
        self.update(|state| state.counters.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.update(|state| state.counters.cache_misses += 1);
    }

    pub fn record_circuit_trip(&self) {
        self.update(|state| {
            state.counters.circuit_breaker_trips += 1;
            state.window.circuit_trips += 1;
        });
    }

    pub fn record_rate_limit_hit(&self) {
        self.update(|state| {
            state.counters.rate_limit_hits += 1;
            state.window.rate_limit_hits += 1;
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let c = &state.counters;
        let lookups = c.cache_hits + c.cache_misses;
        MetricsSnapshot {
            total_requests: c.total_requests,
            success_count: c.success_count,
            failure_count: c.failure_count,
            failures_by_category: c.failures_by_category.clone(),
            error_rate_percent: percent(c.failure_count, c.total_requests),
            average_response_time_ms: state.average_response_ms(),
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate_percent: percent(c.cache_hits, lookups),
            circuit_breaker_trips: c.circuit_breaker_trips,
            rate_limit_hits: c.rate_limit_hits,
            window_started_at: state.window.started_at_wall,
            window_requests: state.window.requests,
            window_failures: state.window.failures,
            recent_alerts: state.recent_alerts.iter().cloned().collect(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut CollectorState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.window.started_at.elapsed() >= ALERT_WINDOW {
            state.window = AlertWindow::new();
        }

        f(&mut state);

        let counts = WindowCounts {
            requests: state.window.requests,
            failures: state.window.failures,
            circuit_trips: state.window.circuit_trips,
            rate_limit_hits: state.window.rate_limit_hits,
            average_response_ms: state.average_response_ms(),
        };
        let thresholds = self.thresholds.load();

        for alert in alerts::evaluate(&counts, &thresholds) {
            if !state.window.fired.insert(alert.kind) {
                continue;
            }
            tracing::warn!(
                kind = alert.kind.as_str(),
                value = alert.value,
                threshold = alert.threshold,
                "ALERT: {}",
                alert.message
            );
            metrics::record_alert(alert.kind.as_str());

            if state.recent_alerts.len() == RECENT_ALERTS {
                state.recent_alerts.pop_front();
            }
            state.recent_alerts.push_back(alert.clone());
            // No subscribers is fine.
            let _ = self.alerts_tx.send(alert);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

fn push_sample(samples: &mut VecDeque<u64>, elapsed: Duration) {
    if samples.len() == RESPONSE_TIME_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(elapsed.as_millis() as u64);
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
