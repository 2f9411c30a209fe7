//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the backend health endpoint
//! - Fold probe outcomes into the shared `HealthStatus`

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use url::Url;

use crate::config::HealthCheckConfig;
use crate::health::degradation::DegradationPolicy;
use crate::health::state::{HealthState, HealthStatus, ProbeOutcome};
use crate::observability::metrics;
use crate::transport::request::join_url;
use crate::transport::{OutboundRequest, Transport, TransportError};

pub struct HealthMonitor {
    transport: Arc<dyn Transport>,
    probe_url: Url,
    config: HealthCheckConfig,
    status: RwLock<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: &Url,
        config: HealthCheckConfig,
    ) -> Result<Self, TransportError> {
        let probe_url = join_url(base_url, &config.path)?;
        Ok(Self {
            transport,
            probe_url,
            config,
            status: RwLock::new(HealthStatus::default()),
        })
    }

    /// Current health snapshot.
    pub fn status(&self) -> HealthStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Behaviour switches for the current state.
    pub fn policy(&self) -> DegradationPolicy {
        DegradationPolicy::for_state(self.status().status)
    }

    pub fn probe_url(&self) -> &Url {
        &self.probe_url
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            url = %self.probe_url,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Issue one probe and apply its outcome.
    pub async fn probe_once(&self) -> HealthStatus {
        let outcome = self.probe().await;

        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        let previous = status.status;
        status.apply(
            &outcome,
            self.config.failure_threshold,
            Duration::from_millis(self.config.latency_threshold_ms),
        );

        if status.status != previous {
            match status.status {
                HealthState::Unhealthy => tracing::warn!(
                    failures = status.consecutive_failures,
                    "Backend marked unhealthy"
                ),
                HealthState::Degraded => tracing::warn!(
                    response_time_ms = ?status.response_time_ms,
                    "Backend degraded: probe latency above threshold"
                ),
                HealthState::Healthy => tracing::info!(
                    from = previous.as_str(),
                    "Backend healthy again"
                ),
            }
        }
        metrics::record_health_status(status.status);

        status.clone()
    }

    async fn probe(&self) -> ProbeOutcome {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("resilient-gateway-health-check"));
        let request = OutboundRequest {
            method: Method::GET,
            url: self.probe_url.clone(),
            headers,
            body: None,
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();

        match time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) if response.is_success() => ProbeOutcome::Success {
                latency: started.elapsed(),
            },
            Ok(Ok(response)) => {
                tracing::warn!(url = %self.probe_url, status = %response.status, "Health check failed: non-success status");
                ProbeOutcome::Failure {
                    reason: format!("status {}", response.status),
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %self.probe_url, error = %e, "Health check failed: connection error");
                ProbeOutcome::Failure {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(url = %self.probe_url, "Health check failed: timeout");
                ProbeOutcome::Failure {
                    reason: "timeout".to_string(),
                }
            }
        }
    }
}
