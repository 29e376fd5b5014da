//! Connection supervisor (C2): one per configured downstream server. Owns
//! a transport client, runs the connection state machine, schedules
//! retries, emits lifecycle events, and runs periodic liveness pings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::RelayResult;
use crate::events::{LifecycleEvent, PoolEvent};
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub server_name: String,
    pub state: ConnectState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<Instant>,
    pub last_ping: Option<Instant>,
    pub transport_kind: &'static str,
}

struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicy {
    fn from_config(cfg: &PoolConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
            multiplier: cfg.backoff_multiplier,
            jitter: cfg.jitter,
        }
    }

    /// delay = min(maxRetryDelay, retryDelay * backoffMultiplier^(retryCount-1))
    fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry_count - 1) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        let delay = Duration::from_millis(millis as u64);
        if self.jitter {
            jittered(delay, retry_count as u64)
        } else {
            delay
        }
    }
}

/// Deterministic pseudo-random jitter in [0.85, 1.15] of the input delay.
/// Avoids pulling in a dedicated RNG crate for a single call site.
fn jittered(delay: Duration, seed: u64) -> Duration {
    let nanos = Instant::now().elapsed().as_nanos() as u64;
    let mixed = seed.wrapping_mul(2_654_435_761).wrapping_add(nanos);
    let frac = 0.85 + ((mixed >> 16) % 301) as f64 / 1000.0;
    Duration::from_millis((delay.as_millis() as f64 * frac) as u64)
}

pub struct Supervisor {
    server_name: String,
    transport: Arc<dyn Transport>,
    transport_kind: &'static str,
    status: AsyncMutex<ConnectionStatus>,
    connected_flag: AtomicBool,
    events: mpsc::Sender<PoolEvent>,
    retry_policy: RetryPolicy,
    ping_interval: Duration,
    retry_task: SyncMutex<Option<JoinHandle<()>>>,
    ping_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        server_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        transport_kind: &'static str,
        pool_config: &PoolConfig,
        ping_interval: Duration,
        events: mpsc::Sender<PoolEvent>,
    ) -> Arc<Self> {
        let server_name = server_name.into();
        Arc::new(Self {
            status: AsyncMutex::new(ConnectionStatus {
                server_name: server_name.clone(),
                state: ConnectState::Disconnected,
                retry_count: 0,
                last_error: None,
                connected_at: None,
                last_ping: None,
                transport_kind,
            }),
            server_name,
            transport,
            transport_kind,
            connected_flag: AtomicBool::new(false),
            events,
            retry_policy: RetryPolicy::from_config(pool_config),
            ping_interval,
            retry_task: SyncMutex::new(None),
            ping_task: SyncMutex::new(None),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected_flag.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status.lock().await.clone()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.try_send(PoolEvent {
            server_name: self.server_name.clone(),
            event,
        });
    }

    /// Serialized by holding the status lock across the whole attempt: a
    /// second concurrent `connect()` blocks here and, once unblocked,
    /// observes the outcome of the first attempt instead of starting a
    /// second transport-level connect (B3).
    pub async fn connect(self: &Arc<Self>) -> RelayResult<()> {
        let mut guard = self.status.lock().await;
        if guard.state == ConnectState::Connected {
            return Ok(());
        }

        guard.state = ConnectState::Connecting;
        guard.last_error = None;
        self.emit(LifecycleEvent::Connecting);

        match self.transport.connect().await {
            Ok(()) => {
                guard.state = ConnectState::Connected;
                guard.connected_at = Some(Instant::now());
                guard.retry_count = 0;
                drop(guard);
                self.connected_flag.store(true, Ordering::SeqCst);
                self.emit(LifecycleEvent::Connected);
                self.spawn_ping_loop();
                self.spawn_notification_forwarder();
                Ok(())
            }
            Err(e) => {
                guard.state = ConnectState::Failed;
                guard.last_error = Some(e.to_string());
                let retry_count = guard.retry_count;
                drop(guard);
                self.connected_flag.store(false, Ordering::SeqCst);
                self.emit(LifecycleEvent::Failed { detail: e.to_string() });
                if e.is_retryable() && retry_count < self.retry_policy.max_retries {
                    self.schedule_retry(retry_count + 1);
                }
                Err(e)
            }
        }
    }

    pub async fn disconnect(self: &Arc<Self>) {
        let mut guard = self.status.lock().await;
        if guard.state == ConnectState::Disconnected {
            return;
        }
        if let Some(task) = self.retry_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.ping_task.lock().take() {
            task.abort();
        }
        self.transport.disconnect().await;
        guard.state = ConnectState::Disconnected;
        guard.connected_at = None;
        drop(guard);
        self.connected_flag.store(false, Ordering::SeqCst);
        self.emit(LifecycleEvent::Disconnected);
    }

    pub async fn ping(&self) -> bool {
        self.transport.ping().await
    }

    fn schedule_retry(self: &Arc<Self>, next_attempt: u32) {
        let delay = self.retry_policy.delay_for(next_attempt);
        let this = Arc::clone(self);
        self.emit(LifecycleEvent::Reconnecting { attempt: next_attempt });
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut guard = this.status.lock().await;
                guard.state = ConnectState::Reconnecting;
                guard.retry_count = next_attempt;
            }
            let _ = this.connect().await;
        });
        *self.retry_task.lock() = Some(handle);
    }

    fn spawn_ping_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval = self.ping_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !this.is_connected() {
                    break;
                }
                let ok = this.ping().await;
                let mut guard = this.status.lock().await;
                guard.last_ping = Some(Instant::now());
                let retry_count = guard.retry_count;
                let still_connected = guard.state == ConnectState::Connected;
                drop(guard);
                if !ok {
                    this.emit(LifecycleEvent::Error {
                        detail: "ping failed".to_string(),
                    });
                    if still_connected && retry_count < this.retry_policy.max_retries {
                        this.connected_flag.store(false, Ordering::SeqCst);
                        this.schedule_retry(retry_count + 1);
                    }
                    break;
                }
            }
        });
        *self.ping_task.lock() = Some(handle);
    }

    fn spawn_notification_forwarder(self: &Arc<Self>) {
        let mut rx = self.transport.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    TransportEvent::Notification { method, .. } if method == "notifications/tools/list_changed" => {
                        this.emit(LifecycleEvent::ToolsListChanged);
                    }
                    TransportEvent::Closed { reason } => {
                        this.emit(LifecycleEvent::Error { detail: reason });
                        break;
                    }
                    _ => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_geometric_up_to_cap() {
        let cfg = PoolConfig {
            max_concurrent_connections: 10,
            max_retries: 5,
            retry_delay_ms: 500,
            max_retry_delay_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let policy = RetryPolicy::from_config(&cfg);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        // capped at max_retry_delay_ms even though the formula would exceed it
        assert_eq!(policy.delay_for(10), Duration::from_millis(8000));
    }

    #[test]
    fn zero_retry_count_has_no_delay() {
        let cfg = PoolConfig {
            max_concurrent_connections: 10,
            max_retries: 5,
            retry_delay_ms: 500,
            max_retry_delay_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let policy = RetryPolicy::from_config(&cfg);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }
}
