//! HTTP transport for source fetches
//!
//! This module provides the `Transport` seam used by the fetch client and
//! its reqwest implementation. The transport sends exactly one request per
//! call and maps every non-success answer to a `TransportError`; spacing
//! and retries are handled by the caller.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::TransportError;

/// Successful response body
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Sends one GET request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url`; any non-2xx status is an error
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport shared by all sources
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the configured User-Agent and timeout
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a transport with a custom reqwest Client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        debug!(url = url, "Sending HTTP GET request");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json, text/html, text/csv;q=0.9, */*;q=0.8")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = response.bytes().await.map_err(map_reqwest_error)?;

            debug!(url = url, body_size = body.len(), "Received response");
            return Ok(TransportResponse {
                status: status.as_u16(),
                body,
                content_type,
            });
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());

                warn!(url = url, retry_after = ?retry_after, "Rate limited by upstream");
                Err(TransportError::RateLimited(retry_after))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!(url = url, status = status.as_u16(), "Resource not found");
                Err(TransportError::HttpStatus(status.as_u16()))
            }
            status if status.is_server_error() => {
                warn!(url = url, status = status.as_u16(), "Server error");
                Err(TransportError::HttpStatus(status.as_u16()))
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(TransportError::HttpStatus(status.as_u16()))
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
