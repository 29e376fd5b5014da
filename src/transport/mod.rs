//! Transport clients (C1): one per downstream wire protocol.
//!
//! Every variant implements the same narrow [`Transport`] capability set so
//! the connection supervisor never branches on transport kind.

pub mod http;
pub mod jsonrpc;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::RelayResult;
use jsonrpc::RequestId;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// A server-pushed message that isn't a response to one of our requests.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Notification { method: String, params: Option<Value> },
    Closed { reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> RelayResult<()>;
    async fn disconnect(&self);
    async fn send(&self, method: &str, params: Option<Value>) -> RelayResult<Value>;
    async fn ping(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Shared id allocator + notification fan-out, embedded by every transport
/// variant so correlation bookkeeping isn't duplicated three times.
pub(crate) struct TransportShared {
    pub ids: jsonrpc::IdGenerator,
    pub events: broadcast::Sender<TransportEvent>,
}

impl TransportShared {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            ids: jsonrpc::IdGenerator::default(),
            events,
        }
    }

    pub fn next_id(&self) -> RequestId {
        self.ids.next()
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
