use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::{ErrorCategory, FailureCause};
use crate::gateway::Gateway;
use crate::health::HealthState;
use crate::resilience::CircuitState;
use crate::transport::{
    ApiResponse, OutboundRequest, RequestDescriptor, ResponseSource, Transport, TransportError,
};

type Handler = dyn Fn(&OutboundRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync;

/// In-memory backend: answers every request through `handler` and records it.
struct ScriptedBackend {
    handler: Box<Handler>,
    latency: Duration,
    seen: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedBackend {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&OutboundRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self::with_latency(Duration::ZERO, handler)
    }

    fn with_latency<F>(latency: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&OutboundRequest, usize) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            latency,
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Requests seen for `path`.
    fn hits(&self, path: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }

    fn requests(&self, path: &str) -> Vec<OutboundRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedBackend {
    async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError> {
        let n = {
            let mut seen = self.seen.lock().unwrap();
            let path = request.url.path().to_string();
            let n = seen.iter().filter(|r| r.url.path() == path).count();
            seen.push(request.clone());
            n
        };
        if !self.latency.is_zero() {
            time::sleep(self.latency).await;
        }
        (self.handler)(&request, n)
    }
}

fn respond(status: u16, body: &'static str) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        body,
    ))
}

fn refused() -> Result<ApiResponse, TransportError> {
    Err(TransportError::ConnectionRefused("backend.test:80".into()))
}

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend.base_url = "http://backend.test/api/".into();
    config
}

fn gateway(config: GatewayConfig, backend: Arc<ScriptedBackend>) -> Arc<Gateway> {
    Arc::new(Gateway::new(config, backend).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_always_503_is_bounded_by_rule() {
    let backend = ScriptedBackend::new(|_, _| respond(503, "busy"));
    let gw = gateway(config(), backend.clone());

    let err = gw.get("/widgets").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ResourceExhaustion);
    assert_eq!(err.attempts, 4);
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(backend.hits("/api/widgets"), 4);

    let snap = gw.snapshot();
    assert_eq!(snap.failure_count, 1);
    assert_eq!(snap.failures_by_category.get("resource_exhaustion"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_global_cap_limits_generous_rules() {
    let backend = ScriptedBackend::new(|_, _| refused());
    let mut cfg = config();
    cfg.retries.max_attempts = 2;
    let gw = gateway(cfg, backend.clone());

    let err = gw.get("/widgets").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Transport);
    assert_eq!(err.attempts, 2);
    assert_eq!(backend.hits("/api/widgets"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let backend = ScriptedBackend::new(|_, _| respond(404, "missing"));
    let gw = gateway(config(), backend.clone());

    let err = gw.get("/widgets/9").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ClientError);
    assert_eq!(err.attempts, 1);
    assert_eq!(backend.hits("/api/widgets/9"), 1);
    // 4xx does not count against the circuit.
    assert_eq!(gw.breaker().state("/widgets/9"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let backend = ScriptedBackend::new(|_, n| if n < 2 { respond(502, "") } else { respond(200, "ok") });
    let gw = gateway(config(), backend.clone());

    let res = gw.call(RequestDescriptor::post("/orders")).await.unwrap();
    assert_eq!(res.text(), "ok");
    assert_eq!(res.source, ResponseSource::Network);
    assert_eq!(backend.hits("/api/orders"), 3);

    // Every attempt of one call carries the same request id.
    let ids: Vec<HeaderValue> = backend
        .requests("/api/orders")
        .into_iter()
        .map(|r| r.headers["x-request-id"].clone())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured() {
    let backend = ScriptedBackend::new(|_, n| {
        if n == 0 {
            let mut headers = HeaderMap::new();
            headers.insert("retry-after", HeaderValue::from_static("2"));
            Ok(ApiResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, ""))
        } else {
            respond(200, "ok")
        }
    });
    let gw = gateway(config(), backend.clone());

    let start = Instant::now();
    gw.call(RequestDescriptor::get("/quota").no_cache()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(gw.snapshot().rate_limit_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_rejects_without_network() {
    let backend = ScriptedBackend::new(|_, _| refused());
    let gw = gateway(config(), backend.clone());

    for _ in 0..5 {
        let err = gw.call(RequestDescriptor::post("/pay").no_retry()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Transport);
    }
    assert_eq!(gw.breaker().state("/pay"), CircuitState::Open);

    let err = gw.call(RequestDescriptor::post("/pay").no_retry()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::CircuitOpen);
    assert!(matches!(err.cause, FailureCause::CircuitOpen { .. }));
    assert_eq!(backend.hits("/api/pay"), 5);
    assert_eq!(gw.snapshot().circuit_breaker_trips, 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opening_mid_retry_keeps_real_failure() {
    let backend = ScriptedBackend::new(|_, _| refused());
    let gw = gateway(config(), backend.clone());

    let err = gw.call(RequestDescriptor::post("/jobs")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Transport);
    assert_eq!(err.attempts, 5);
    assert!(matches!(
        err.cause,
        FailureCause::Transport(TransportError::ConnectionRefused(_))
    ));
    assert_eq!(backend.hits("/api/jobs"), 5);
    assert_eq!(gw.breaker().state("/jobs"), CircuitState::Open);
    assert_eq!(gw.snapshot().failures_by_category.get("transport"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_cache_hit_skips_network() {
    let backend = ScriptedBackend::new(|_, _| respond(200, "{\"v\":1}"));
    let gw = gateway(config(), backend.clone());

    gw.get("/widgets").await.unwrap();
    let cached = gw.get("/widgets").await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(backend.hits("/api/widgets"), 1);

    time::advance(Duration::from_secs(301)).await;
    let refreshed = gw.get("/widgets").await.unwrap();
    assert_eq!(refreshed.source, ResponseSource::Network);
    assert_eq!(backend.hits("/api/widgets"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_backend_serves_stale_entry() {
    let backend = ScriptedBackend::new(|req, _| {
        if req.url.path() == "/api/health" {
            refused()
        } else {
            respond(200, "{\"v\":1}")
        }
    });
    let gw = gateway(config(), backend.clone());

    gw.get("/widgets").await.unwrap();
    time::advance(Duration::from_secs(600)).await;

    for _ in 0..3 {
        gw.health_monitor().probe_once().await;
    }
    assert_eq!(gw.health().status, HealthState::Unhealthy);

    let stale = gw.call(RequestDescriptor::get("/widgets")).await.unwrap();
    assert_eq!(stale.source, ResponseSource::StaleCache);
    assert_eq!(stale.text(), "{\"v\":1}");
    assert_eq!(backend.hits("/api/widgets"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_backend_serves_stale_entry() {
    let backend = ScriptedBackend::with_latency(Duration::from_millis(1_500), |_, _| {
        respond(200, "{\"v\":2}")
    });
    let gw = gateway(config(), backend.clone());

    gw.get("/widgets").await.unwrap();
    time::advance(Duration::from_secs(600)).await;

    gw.health_monitor().probe_once().await;
    assert_eq!(gw.health().status, HealthState::Degraded);

    let stale = gw.get("/widgets").await.unwrap();
    assert_eq!(stale.source, ResponseSource::StaleCache);
    assert_eq!(stale.text(), "{\"v\":2}");
    assert_eq!(backend.hits("/api/widgets"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_backend_skips_non_critical_reads() {
    let backend = ScriptedBackend::new(|req, _| {
        if req.url.path() == "/api/health" {
            respond(500, "")
        } else {
            respond(200, "live")
        }
    });
    let gw = gateway(config(), backend.clone());
    for _ in 0..3 {
        gw.health_monitor().probe_once().await;
    }

    let err = gw.get("/reports").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Skipped);
    assert_eq!(err.attempts, 0);
    assert_eq!(backend.hits("/api/reports"), 0);

    // Critical reads and writes still go out.
    gw.call(RequestDescriptor::get("/reports").critical()).await.unwrap();
    gw.call(RequestDescriptor::post("/reports")).await.unwrap();
    assert_eq!(backend.hits("/api/reports"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_backend_shrinks_timeout() {
    let backend = ScriptedBackend::with_latency(Duration::from_millis(1_500), |req, _| {
        if req.url.path() == "/api/health" {
            respond(200, "")
        } else {
            respond(200, "slow")
        }
    });
    let mut cfg = config();
    cfg.timeouts.request_ms = 30_000;
    cfg.timeouts.degraded_request_ms = 1_000;
    cfg.retries.max_attempts = 1;
    let gw = gateway(cfg, backend);

    gw.health_monitor().probe_once().await;
    assert_eq!(gw.health().status, HealthState::Degraded);

    let err = gw.call(RequestDescriptor::post("/slow")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Transport);
    assert!(matches!(
        err.cause,
        FailureCause::Transport(TransportError::Timeout(d)) if d == Duration::from_secs(1)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_key_stalls_queue() {
    let backend = ScriptedBackend::new(|_, _| respond(200, "ok"));
    let mut cfg = config();
    cfg.rate_limit.max_requests = 1;
    cfg.rate_limit.window_ms = 1_000;
    let gw = gateway(cfg, backend.clone());
    let start = Instant::now();

    gw.call(RequestDescriptor::get("/a").no_cache()).await.unwrap();

    let g = gw.clone();
    let a = tokio::spawn(async move {
        g.call(RequestDescriptor::get("/a").no_cache()).await.unwrap();
        Instant::now()
    });
    tokio::task::yield_now().await;

    let g = gw.clone();
    let b = tokio::spawn(async move {
        g.call(RequestDescriptor::get("/b").no_cache()).await.unwrap();
        Instant::now()
    });

    let a_done = a.await.unwrap();
    let b_done = b.await.unwrap();
    assert!(a_done - start >= Duration::from_millis(1_000));
    assert!(b_done >= a_done);
    assert!(gw.snapshot().rate_limit_hits >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_limit_hint_pauses_queue() {
    let backend = ScriptedBackend::new(|_, n| {
        if n == 0 {
            let mut headers = HeaderMap::new();
            headers.insert("x-ratelimit-limit", HeaderValue::from_static("10"));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", HeaderValue::from_static("3"));
            Ok(ApiResponse::new(StatusCode::OK, headers, "last"))
        } else {
            respond(200, "ok")
        }
    });
    let gw = gateway(config(), backend);

    let start = Instant::now();
    gw.call(RequestDescriptor::get("/feed").no_cache()).await.unwrap();
    gw.call(RequestDescriptor::get("/feed").no_cache()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_far_server_reset_is_clamped() {
    let backend = ScriptedBackend::new(|_, n| {
        if n == 0 {
            let mut headers = HeaderMap::new();
            headers.insert("x-ratelimit-limit", HeaderValue::from_static("10"));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", HeaderValue::from_static("999999999"));
            Ok(ApiResponse::new(StatusCode::OK, headers, "last"))
        } else {
            respond(200, "ok")
        }
    });
    let mut cfg = config();
    cfg.rate_limit.max_server_pause_secs = 30;
    let gw = gateway(cfg, backend);

    let start = Instant::now();
    gw.call(RequestDescriptor::get("/feed").no_cache()).await.unwrap();
    gw.call(RequestDescriptor::get("/feed").no_cache()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let backend = ScriptedBackend::new(|_, _| respond(503, ""));
    let gw = gateway(config(), backend.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let err = gw
        .call_with_cancel(RequestDescriptor::get("/widgets"), cancel)
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Cancelled);
    assert_eq!(err.attempts, 1);
    assert_eq!(backend.hits("/api/widgets"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reloaded_retry_rules_apply_to_next_call() {
    let backend = ScriptedBackend::new(|_, _| respond(503, ""));
    let gw = gateway(config(), backend.clone());

    let mut next = config();
    next.retries.rules.service_unavailable.max_retries = 0;
    gw.apply_config(next);

    let err = gw.get("/widgets").await.unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(backend.hits("/api/widgets"), 1);
    assert_eq!(gw.config().retries.rules.service_unavailable.max_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_post_json_sends_body() {
    let backend = ScriptedBackend::new(|_, _| respond(201, "{\"id\":7}"));
    let gw = gateway(config(), backend.clone());

    let res = gw
        .post_json("/widgets", &serde_json::json!({ "name": "gear" }))
        .await
        .unwrap();
    assert_eq!(res.status, StatusCode::CREATED);
    let sent = backend.requests("/api/widgets");
    assert!(matches!(
        &sent[0].body,
        Some(crate::transport::RequestBody::Json(v)) if v["name"] == "gear"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_background_tasks_stop_on_shutdown() {
    let backend = ScriptedBackend::new(|_, _| respond(200, ""));
    let gw = gateway(config(), backend.clone());
    let shutdown = crate::lifecycle::Shutdown::new();

    let handles = gw.spawn_background(&shutdown);
    assert_eq!(handles.len(), 3);
    time::sleep(Duration::from_secs(31)).await;
    assert_eq!(backend.hits("/api/health"), 2);

    shutdown.trigger();
    for handle in handles {
        handle.await.unwrap();
    }
}
