//! Transport port implementation over [`HttpClient`].
//!
//! Reconstructs stored queue requests into real HTTP calls. Non-2xx
//! statuses are returned as responses, never as errors — classification
//! (conflict vs retryable) is the orchestrator's concern. Only
//! transport-level failures surface as [`ApiError::Network`].

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use waypoint_core::Transport;
use waypoint_domain::{
    ApiError, HttpMethod, QueuedRequest, Result, TransportResponse,
};

use super::client::HttpClient;

/// Reqwest-backed transport executor for queued requests.
#[derive(Clone)]
pub struct HttpTransport {
    client: HttpClient,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport rooted at the backend base URL (no trailing
    /// slash).
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    fn method_for(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &QueuedRequest) -> Result<TransportResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(Self::method_for(request.method), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = self.client.send(builder).await?;
        let status = response.status().as_u16();

        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read response body: {e}")))?;
        let body = if text.is_empty() {
            None
        } else {
            // Non-JSON bodies are preserved verbatim as a string value.
            Some(
                serde_json::from_str(&text)
                    .unwrap_or_else(|_| serde_json::Value::String(text)),
            )
        };

        debug!(%url, status, "Executed queued request");
        Ok(TransportResponse { status, body })
    }
}
