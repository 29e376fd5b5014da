//! SSE transport: an inbound event stream carries responses and
//! notifications, outbound requests go out as HTTP POSTs on a second
//! channel. Responses are correlated to requests by `id` via a pending map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::TryStreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::jsonrpc::{InboundFrame, JsonRpcError, JsonRpcRequest, RequestId};
use super::{Transport, TransportEvent, TransportShared};
use crate::error::{RelayError, RelayResult};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<DashMap<RequestId, oneshot::Sender<Result<Value, JsonRpcError>>>>;

pub struct SseTransport {
    server_name: String,
    url: String,
    client: reqwest::Client,
    shared: TransportShared,
    pending: PendingMap,
    request_timeout: Duration,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
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
            .map_err(|e| RelayError::Config(format!("building sse client for '{server_name}': {e}")))?;
        Ok(Self {
            server_name,
            url: url.into(),
            client,
            shared: TransportShared::new(),
            pending: Arc::new(DashMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader_task: Mutex::new(None),
        })
    }
}

async fn read_loop(
    server_name: String,
    response: reqwest::Response,
    pending: PendingMap,
    events: broadcast::Sender<TransportEvent>,
) {
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let mut stream = byte_stream.eventsource();

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "sse stream error");
                continue;
            }
        };
        if event.data.trim().is_empty() {
            continue;
        }
        let frame: InboundFrame = match serde_json::from_str(&event.data) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "failed to parse sse frame, dropping message");
                continue;
            }
        };
        if frame.is_response() {
            let id = frame.id.clone().expect("checked by is_response");
            if let Some((_, sender)) = pending.remove(&id) {
                let response = frame.into_response();
                let _ = sender.send(response.into_result());
            }
            continue;
        }
        if let Some(method) = frame.method {
            let _ = events.send(TransportEvent::Notification {
                method,
                params: frame.params,
            });
        }
    }
    let _ = events.send(TransportEvent::Closed {
        reason: "event stream ended".to_string(),
    });
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> RelayResult<()> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| RelayError::ConnectionFailed {
                server: self.server_name.clone(),
                detail: format!("failed to open event stream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(RelayError::ConnectionFailed {
                server: self.server_name.clone(),
                detail: format!("event stream returned status {}", response.status()),
            });
        }

        let handle = tokio::spawn(read_loop(
            self.server_name.clone(),
            response,
            Arc::clone(&self.pending),
            self.shared.events.clone(),
        ));
        *self.reader_task.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
        self.pending.clear();
    }

    async fn send(&self, method: &str, params: Option<Value>) -> RelayResult<Value> {
        let id = self.shared.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let post = self.client.post(&self.url).json(&request).send();

        if let Err(e) = post.await {
            self.pending.remove(&id);
            return Err(RelayError::Transport {
                server: self.server_name.clone(),
                detail: format!("post failed: {e}"),
            });
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(RelayError::Transport {
                server: self.server_name.clone(),
                detail: e.to_string(),
            }),
            Ok(Err(_)) => Err(RelayError::Transport {
                server: self.server_name.clone(),
                detail: "connection closed while request was pending".to_string(),
            }),
            Err(_) => {
                self.pending.remove(&id);
                Err(RelayError::Timeout {
                    server: self.server_name.clone(),
                    millis: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn ping(&self) -> bool {
        self.send("ping", None).await.is_ok()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.subscribe()
    }
}
