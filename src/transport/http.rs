//! Plain HTTP request/response transport.
//!
//! `connect` is a liveness probe, not a persistent socket: every call after
//! that issues its own POST. There is no server-pushed notification channel
//! on this variant, so `subscribe()` yields a receiver that never fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::broadcast;

use super::jsonrpc::JsonRpcRequest;
use super::{Transport, TransportEvent, TransportShared};
use crate::error::{RelayError, RelayResult};

pub struct HttpTransport {
    server_name: String,
    url: String,
    client: reqwest::Client,
    shared: TransportShared,
    probed_ok: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        server_name: impl Into<String>,
        url: impl Into<String>,
        headers: &HashMap<String, String>,
    ) -> RelayResult<Self> {
        let server_name = server_name.into();
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::try_from(k.as_str()).map_err(|e| RelayError::Config(format!(
                "invalid header name '{k}' for server '{server_name}': {e}"
            )))?;
            let value = HeaderValue::try_from(v.as_str()).map_err(|e| RelayError::Config(format!(
                "invalid header value for '{k}' on server '{server_name}': {e}"
            )))?;
            header_map.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| RelayError::Config(format!("building http client for '{server_name}': {e}")))?;
        Ok(Self {
            server_name,
            url: url.into(),
            client,
            shared: TransportShared::new(),
            probed_ok: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> RelayResult<()> {
        let ok = self.ping().await;
        self.probed_ok.store(ok, Ordering::SeqCst);
        if ok {
            Ok(())
        } else {
            Err(RelayError::ConnectionFailed {
                server: self.server_name.clone(),
                detail: "liveness probe failed".to_string(),
            })
        }
    }

    async fn disconnect(&self) {
        self.probed_ok.store(false, Ordering::SeqCst);
    }

    async fn send(&self, method: &str, params: Option<Value>) -> RelayResult<Value> {
        let id = self.shared.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::Transport {
                server: self.server_name.clone(),
                detail: format!("request failed: {e}"),
            })?;

        let body: super::jsonrpc::JsonRpcResponse = response.json().await.map_err(|e| RelayError::ParseFailure {
            server: self.server_name.clone(),
            detail: e.to_string(),
        })?;

        body.into_result().map_err(|e| RelayError::Transport {
            server: self.server_name.clone(),
            detail: e.to_string(),
        })
    }

    async fn ping(&self) -> bool {
        self.client
            .get(&self.url)
            .send()
            .await
            .map(|r| r.status().is_success() || r.status().as_u16() == 405)
            .unwrap_or(false)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_header_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header\n".to_string(), "x".to_string());
        let result = HttpTransport::new("svc", "https://example.invalid/mcp", &headers);
        assert!(result.is_err());
    }
}
