//! Outbound HTTP transport.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor (caller intent, immutable)
//!     → request.rs builds an OutboundRequest per attempt (URL join, headers, body)
//!     → Transport::send (client.rs: reqwest)
//!     → response.rs ApiResponse (status, headers, body, rate-limit hints)
//! ```
//!
//! # Design Decisions
//! - The transport performs exactly one attempt; timeouts, retries and
//!   cancellation belong to the gateway
//! - Non-success statuses are returned as responses, not errors
//! - Tests substitute their own `Transport` implementation

pub mod client;
pub mod request;
pub mod response;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpTransport;
pub use request::{MultipartPart, OutboundRequest, RequestBody, RequestDescriptor, RequestFlags};
pub use response::{ApiResponse, RateLimitHeaders, ResponseSource};

/// One network attempt against the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError>;
}

/// Failures below the HTTP status level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built (bad URL, header, body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// True for failures caused by the network rather than the request itself.
    pub fn is_network(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

impl TransportError {
    /// Map a reqwest failure; `timeout` is the deadline the client enforces.
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(timeout)
        } else if e.is_connect() {
            TransportError::ConnectionRefused(e.to_string())
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_request() {
            TransportError::ConnectionReset(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}
