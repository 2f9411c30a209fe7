//! Request description and per-attempt request construction.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use crate::transport::TransportError;

/// Per-call behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFlags {
    /// Serve reads from (and store them into) the response cache.
    pub use_cache: bool,
    /// Allow failed attempts to be retried.
    pub allow_retry: bool,
    /// Critical calls are never skipped because of backend health.
    pub critical: bool,
    /// Per-attempt timeout replacing the configured one.
    pub timeout_override: Option<Duration>,
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self {
            use_cache: true,
            allow_retry: true,
            critical: false,
            timeout_override: None,
        }
    }
}

/// A named part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: String,
    pub data: Bytes,
    pub file_name: Option<String>,
    pub mime: Option<String>,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `content-type: application/json`.
    Json(serde_json::Value),
    /// Raw upload; no content-type is set.
    Binary(Bytes),
    /// Multipart form; the transport sets the boundary content-type.
    Multipart(Vec<MultipartPart>),
}

/// Everything the caller wants from one gateway call. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub flags: RequestFlags,
}

impl RequestDescriptor {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            flags: RequestFlags::default(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn binary(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Binary(data.into()));
        self
    }

    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = Some(RequestBody::Multipart(parts));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.flags.use_cache = false;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.flags.allow_retry = false;
        self
    }

    pub fn critical(mut self) -> Self {
        self.flags.critical = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.flags.timeout_override = Some(timeout);
        self
    }

    /// GET and HEAD.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Cache key: method plus endpoint.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }

    /// Key used by the rate limiter and circuit breaker.
    pub fn endpoint_key(&self) -> &str {
        self.endpoint
            .split('?')
            .next()
            .unwrap_or(self.endpoint.as_str())
    }

    /// Build the request for one attempt.
    pub fn to_outbound(
        &self,
        base_url: &Url,
        default_headers: &HeaderMap,
        request_id: &str,
    ) -> Result<OutboundRequest, TransportError> {
        let url = join_url(base_url, &self.endpoint)?;

        let mut headers = default_headers.clone();
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        let id = HeaderValue::from_str(request_id)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        headers.insert("x-request-id", id);

        // Bodies are never sent with reads.
        let body = if self.is_read() { None } else { self.body.clone() };

        Ok(OutboundRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }
}

/// A fully resolved request for a single attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

/// Append `endpoint` to `base`, keeping any path prefix on the base URL.
pub fn join_url(base: &Url, endpoint: &str) -> Result<Url, TransportError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Url::parse(endpoint).map_err(|e| TransportError::InvalidRequest(e.to_string()));
    }
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}
