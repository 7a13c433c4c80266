use crate::request::{Body, HttpRequest};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    // Connection refused/reset, DNS failure, or the response never arrived.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    /// Failures worth retrying: nothing usable came back from the server.
    pub fn is_network_class(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Network(_))
    }
}

/// Performs one HTTP exchange. Retries and auth live above this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        req: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        req: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (k, v) in &req.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| TransportError::Invalid(format!("invalid header name: {k}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|_| TransportError::Invalid(format!("invalid header value for {k}")))?;
            headers.insert(name, value);
        }

        let builder = match req.method.as_str() {
            "GET" => self.client.get(&req.url),
            "POST" => self.client.post(&req.url),
            "PUT" => self.client.put(&req.url),
            "DELETE" => self.client.delete(&req.url),
            other => {
                return Err(TransportError::Invalid(format!("unsupported method: {other}")));
            }
        }
        .headers(headers)
        // Covers the whole exchange, body included.
        .timeout(timeout);

        let builder = match &req.body {
            Body::Empty => builder,
            Body::Json(s) => builder.body(s.clone()),
            Body::MultipartFormData { bytes, .. } => builder.body(bytes.clone()),
        };

        let resp = builder.send().await.map_err(|e| {
            let e = classify(e);
            log::debug!("{} {} failed: {e}", req.method, req.url);
            e
        })?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(classify)?.to_vec();
        log::debug!("{} {} -> {status} ({} bytes)", req.method, req.url, body.len());

        Ok(HttpResponse { status, body })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::Invalid(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
