//! JSON-RPC over HTTP, used for secondary nodes.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use crate::{RpcTransport, UpstreamError};

/// Default timeout for a single request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP JSON-RPC client bound to one node URL.
pub struct HttpRpcClient {
    url: String,
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            http_client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Transport(format!("request timed out: {e}"))
    } else if e.is_connect() {
        UpstreamError::Transport(format!("connection failed: {e}"))
    } else if e.is_decode() {
        UpstreamError::Decode(e.to_string())
    } else {
        UpstreamError::Transport(e.to_string())
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::new(id, method, params);

        let response = self
            .http_client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(UpstreamError::HttpStatus(response.status().as_u16()));
        }

        let message: JsonRpcMessage = response.json().await.map_err(map_reqwest_error)?;
        message.into_result()
    }
}
