//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use resilient_gateway::GatewayConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock backend saw.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Per-path hit counts for a running backend.
#[derive(Clone, Default)]
pub struct Hits(Arc<std::sync::Mutex<Vec<String>>>);

impl Hits {
    pub fn count(&self, path: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|p| p.as_str() == path).count()
    }
}

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
///
/// `handler` gets the parsed request and the number of earlier requests to
/// the same path.
pub async fn start_backend<F>(handler: F) -> (SocketAddr, Hits)
where
    F: Fn(&MockRequest, usize) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    let hits = Hits::default();
    let seen = hits.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = serve(socket, handler.as_ref(), &seen).await;
            });
        }
    });

    (addr, hits)
}

async fn serve<F>(mut socket: TcpStream, handler: &F, seen: &Hits) -> std::io::Result<()>
where
    F: Fn(&MockRequest, usize) -> MockResponse,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    // Drain the body so the client never sees a reset.
    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body_read = buf.len() - head_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    let request = MockRequest {
        method,
        path: path.clone(),
        headers,
    };
    let earlier = {
        let mut paths = seen.0.lock().unwrap();
        let earlier = paths.iter().filter(|p| **p == path).count();
        paths.push(path);
        earlier
    };
    let response = handler(&request, earlier);

    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);

    socket.write_all(out.as_bytes()).await?;
    socket.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Config pointed at `addr` with fast, jitter-free retries.
pub fn config_for(addr: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend.base_url = format!("http://{addr}/");
    config.retries.base_delay_ms = 5;
    config.retries.max_delay_ms = 50;
    config.retries.jitter_ms = 0;
    config.health_check.timeout_secs = 2;
    config
}
