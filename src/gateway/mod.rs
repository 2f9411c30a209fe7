//! The gateway façade.
//!
//! # Data Flow
//! ```text
//! Gateway::call(RequestDescriptor)
//!     → health status → DegradationPolicy
//!     → fresh cache hit?                       → return
//!     → stale entry and fallback allowed?      → return (warn)
//!     → non-critical read while unhealthy?     → skipped error
//!     → retry loop:
//!         RequestQueue (FIFO + rate-limit gate)
//!         → CircuitBreaker::execute_with(endpoint)
//!         → Transport::send under deadline + cancellation
//!         → failure: classify → decide → backoff sleep → again
//!     → cache store (reads), metrics, return
//! ```
//!
//! # Design Decisions
//! - One `Gateway` value owns every component; share it with `Arc`
//! - Retry rules, timeouts and alert thresholds hot-reload through `ArcSwap`;
//!   everything else is fixed at construction
//! - Background loops (health probe, limiter and cache sweeps) stop on `Shutdown`

mod call;
#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::error::BuildError;
use crate::health::{HealthMonitor, HealthStatus};
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, MetricsCollector, MetricsSnapshot};
use crate::queue::RequestQueue;
use crate::rate_limit::{build_rate_limiter, RateLimitOptions, RateLimiter};
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::transport::{HttpTransport, Transport};

pub struct Gateway {
    config: ArcSwap<GatewayConfig>,
    base_url: Url,
    default_headers: HeaderMap,
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    queue: RequestQueue,
    max_server_pause: Duration,
    breaker: CircuitBreaker,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
}

impl Gateway {
    /// Build with the reqwest transport and the configured limiter backend.
    pub fn from_config(config: GatewayConfig) -> Result<Self, BuildError> {
        let transport = Arc::new(HttpTransport::new()?);
        let limiter = build_rate_limiter(&config.rate_limit)?;
        Self::with_parts(config, transport, limiter)
    }

    /// Build with a custom transport (tests, proxies, recording).
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, BuildError> {
        let limiter = build_rate_limiter(&config.rate_limit)?;
        Self::with_parts(config, transport, limiter)
    }

    pub fn with_parts(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self, BuildError> {
        let base_url = Url::parse(&config.backend.base_url).map_err(|source| BuildError::BaseUrl {
            url: config.backend.base_url.clone(),
            source,
        })?;
        let default_headers = header_map(&config)?;

        let collector = Arc::new(MetricsCollector::new(config.alerts.clone()));

        let trips = collector.clone();
        let breaker = CircuitBreaker::new(&config.circuit_breaker).with_listener(Arc::new(
            move |key: &str, from: CircuitState, to: CircuitState| {
                metrics::record_circuit_transition(key, from, to);
                if to == CircuitState::Open {
                    trips.record_circuit_trip();
                }
            },
        ));

        let queue = RequestQueue::new(
            limiter,
            RateLimitOptions::from(&config.rate_limit),
            config.rate_limit.enabled,
            collector.clone(),
        );

        let health = Arc::new(HealthMonitor::new(
            transport.clone(),
            &base_url,
            config.health_check.clone(),
        )?);

        tracing::info!(
            base_url = %base_url,
            rate_limiter = queue.limiter().backend_name(),
            cache = config.cache.enabled,
            health_checks = config.health_check.enabled,
            "Gateway initialized"
        );

        Ok(Self {
            cache: ResponseCache::new(&config.cache),
            max_server_pause: Duration::from_secs(config.rate_limit.max_server_pause_secs.max(1)),
            config: ArcSwap::from_pointee(config),
            base_url,
            default_headers,
            transport,
            queue,
            breaker,
            health,
            metrics: collector,
        })
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Swap in a reloaded configuration.
    ///
    /// Retry rules, timeouts and alert thresholds take effect on the next call.
    /// Other sections only change on restart.
    pub fn apply_config(&self, next: GatewayConfig) {
        let current = self.config.load();
        let fixed = [
            ("backend", current.backend != next.backend),
            ("rate_limit", current.rate_limit != next.rate_limit),
            ("circuit_breaker", current.circuit_breaker != next.circuit_breaker),
            ("health_check", current.health_check != next.health_check),
            ("cache", current.cache != next.cache),
            ("observability", current.observability != next.observability),
        ];
        for (section, changed) in fixed {
            if changed {
                tracing::warn!(section, "Config section changed; restart required to apply");
            }
        }

        self.metrics.set_thresholds(next.alerts.clone());
        self.config.store(Arc::new(next));
        tracing::info!("Configuration reloaded");
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Start the health probe and the sweepers; each stops on shutdown.
    pub fn spawn_background(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let config = self.config.load();
        let mut handles = vec![tokio::spawn(self.health.clone().run(shutdown.subscribe()))];

        if config.rate_limit.enabled {
            let limiter = self.queue.limiter().clone();
            handles.push(spawn_periodic(
                "rate-limit sweeper",
                Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
                shutdown.subscribe(),
                move || {
                    let limiter = limiter.clone();
                    async move {
                        limiter.sweep().await;
                    }
                },
            ));
        }

        if config.cache.enabled {
            let gateway = Arc::clone(self);
            handles.push(spawn_periodic(
                "cache sweeper",
                Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
                shutdown.subscribe(),
                move || {
                    gateway.cache.sweep();
                    async {}
                },
            ));
        }

        handles
    }
}

/// Run `task` every `every` (first run after one period) until shutdown.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                _ = shutdown.recv() => {
                    tracing::debug!(task = name, "Background task stopping");
                    break;
                }
            }
        }
    })
}

fn header_map(config: &GatewayConfig) -> Result<HeaderMap, BuildError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.backend.default_headers {
        let invalid = || BuildError::Header { name: name.clone() };
        let name_h = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value_h = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(name_h, value_h);
    }
    Ok(headers)
}
