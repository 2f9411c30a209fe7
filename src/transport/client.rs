//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

use crate::transport::request::{MultipartPart, OutboundRequest, RequestBody};
use crate::transport::response::ApiResponse;
use crate::transport::{Transport, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Production transport over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    /// Deadline the client itself enforces, reported on reqwest timeouts.
    client_timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("resilient-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            client_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Wrap an existing client (custom TLS, proxies, pool settings) whose
    /// own timeout is `client_timeout`.
    pub fn with_client(client: Client, client_timeout: Duration) -> Self {
        Self {
            client,
            client_timeout,
        }
    }

    fn error(&self, e: reqwest::Error) -> TransportError {
        TransportError::from_reqwest(e, self.client_timeout)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Binary(bytes)) => builder.body(bytes),
            Some(RequestBody::Multipart(parts)) => builder.multipart(build_form(parts)?),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| self.error(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.error(e))?;

        Ok(ApiResponse::new(status, headers, body))
    }
}

fn build_form(parts: Vec<MultipartPart>) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for part in parts {
        let mut p = Part::bytes(part.data.to_vec());
        if let Some(file_name) = part.file_name {
            p = p.file_name(file_name);
        }
        if let Some(mime) = part.mime {
            p = p
                .mime_str(&mime)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        }
        form = form.part(part.name, p);
    }
    Ok(form)
}
