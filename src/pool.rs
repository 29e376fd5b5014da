//! Connection pool (C3): owns one supervisor per configured server, applies
//! the global concurrent-connection cap, and fans lifecycle events out to a
//! single channel the rest of the runtime subscribes to.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;

use crate::config::{PoolConfig, RelayConfig, ServerConfig, Transport as TransportConfig};
use crate::error::{RelayError, RelayResult};
use crate::events::PoolEvent;
use crate::supervisor::{ConnectState, ConnectionStatus, Supervisor};
use crate::transport::{HttpTransport, SseTransport, StdioTransport, Transport};

fn build_transport(server_name: &str, config: &TransportConfig) -> RelayResult<(Arc<dyn Transport>, &'static str)> {
    match config {
        TransportConfig::Stdio { command, args, env } => {
            let transport = StdioTransport::new(server_name.to_string(), command.clone(), args.clone(), env.clone());
            Ok((Arc::new(transport), "stdio"))
        }
        TransportConfig::Http { url, headers } => {
            let transport = HttpTransport::new(server_name.to_string(), url.clone(), headers)?;
            Ok((Arc::new(transport), "http"))
        }
        TransportConfig::Sse { url, headers } => {
            let transport = SseTransport::new(server_name.to_string(), url.clone(), headers)?;
            Ok((Arc::new(transport), "sse"))
        }
    }
}

pub struct ConnectionPool {
    supervisors: DashMap<String, Arc<Supervisor>>,
    events_tx: mpsc::Sender<PoolEvent>,
    pool_config: PoolConfig,
    ping_interval: Duration,
    /// Servers whose connect was deferred because `max_concurrent_connections`
    /// was saturated at the time; drained as connections free up.
    pending_connects: SyncMutex<VecDeque<String>>,
}

impl ConnectionPool {
    /// Builds one supervisor per `enabled` server in the config. Duplicate
    /// names are structurally impossible (the config map already enforces
    /// that); this only wires transports up and leaves every supervisor
    /// `Disconnected` until [`Self::start`] is called.
    pub fn new(config: &RelayConfig) -> RelayResult<(Self, mpsc::Receiver<PoolEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let pool = Self {
            supervisors: DashMap::new(),
            events_tx,
            pool_config: config.pool.clone(),
            ping_interval: Duration::from_secs(config.ping.interval_secs),
            pending_connects: SyncMutex::new(VecDeque::new()),
        };
        for (name, server) in &config.servers {
            if server.enabled {
                pool.add_server(name, server)?;
            }
        }
        Ok((pool, events_rx))
    }

    pub fn add_server(&self, name: &str, server: &ServerConfig) -> RelayResult<()> {
        if self.supervisors.contains_key(name) {
            return Err(RelayError::DuplicateServer(name.to_string()));
        }
        let (transport, kind) = build_transport(name, &server.transport)?;
        let supervisor = Supervisor::new(
            name,
            transport,
            kind,
            &self.pool_config,
            self.ping_interval,
            self.events_tx.clone(),
        );
        self.supervisors.insert(name.to_string(), supervisor);
        Ok(())
    }

    pub async fn remove_server(&self, name: &str) -> RelayResult<()> {
        let Some((_, supervisor)) = self.supervisors.remove(name) else {
            return Err(RelayError::UnknownServer(name.to_string()));
        };
        supervisor.disconnect().await;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Supervisor>> {
        self.supervisors.get(name).map(|e| Arc::clone(&e))
    }

    pub fn server_names(&self) -> Vec<String> {
        self.supervisors.iter().map(|e| e.key().clone()).collect()
    }

    async fn active_connection_count(&self) -> usize {
        let mut count = 0;
        for entry in self.supervisors.iter() {
            let status = entry.status().await;
            if matches!(status.state, ConnectState::Connected | ConnectState::Connecting) {
                count += 1;
            }
        }
        count
    }

    /// Connects `name`, or, if the pool is already at
    /// `max_concurrent_connections`, defers the attempt: the server name is
    /// queued and connected automatically once another supervisor frees a
    /// slot (see [`Self::drain_pending`]). Callers that need to know whether
    /// a connect actually happened should poll [`Self::status`].
    pub async fn connect(&self, name: &str) -> RelayResult<()> {
        let supervisor = self.get(name).ok_or_else(|| RelayError::UnknownServer(name.to_string()))?;
        if supervisor.is_connected() {
            return Ok(());
        }
        if self.active_connection_count().await >= self.pool_config.max_concurrent_connections {
            tracing::warn!(
                server = %name,
                max = self.pool_config.max_concurrent_connections,
                "max_concurrent_connections reached, deferring connect"
            );
            self.pending_connects.lock().push_back(name.to_string());
            return Ok(());
        }
        let result = supervisor.connect().await;
        self.drain_pending().await;
        result
    }

    pub async fn disconnect(&self, name: &str) -> RelayResult<()> {
        let supervisor = self.get(name).ok_or_else(|| RelayError::UnknownServer(name.to_string()))?;
        supervisor.disconnect().await;
        self.drain_pending().await;
        Ok(())
    }

    /// Connects as many queued servers as current capacity allows. Called
    /// whenever a supervisor frees a slot by leaving `Connected`/`Connecting`,
    /// so a deferred `connect` eventually runs without the caller polling.
    async fn drain_pending(&self) {
        loop {
            if self.active_connection_count().await >= self.pool_config.max_concurrent_connections {
                return;
            }
            let Some(name) = self.pending_connects.lock().pop_front() else {
                return;
            };
            let Some(supervisor) = self.get(&name) else {
                continue;
            };
            if supervisor.is_connected() {
                continue;
            }
            if let Err(e) = supervisor.connect().await {
                tracing::warn!(server = %name, error = %e, "deferred connect failed");
            }
        }
    }

    pub async fn reconnect(&self, name: &str) -> RelayResult<()> {
        self.disconnect(name).await?;
        self.connect(name).await
    }

    /// Connects every registered server, tolerating individual failures:
    /// a single bad server must not stop the others from coming up.
    pub async fn start(&self) {
        let names = self.server_names();
        for name in names {
            if let Err(e) = self.connect(&name).await {
                tracing::warn!(server = %name, error = %e, "initial connect failed");
            }
        }
    }

    pub async fn stop(&self) {
        let names = self.server_names();
        for name in names {
            if let Some(supervisor) = self.get(&name) {
                supervisor.disconnect().await;
            }
        }
    }

    pub async fn status(&self, name: &str) -> Option<ConnectionStatus> {
        match self.get(name) {
            Some(s) => Some(s.status().await),
            None => None,
        }
    }

    pub async fn all_statuses(&self) -> Vec<ConnectionStatus> {
        let mut out = Vec::new();
        for entry in self.supervisors.iter() {
            out.push(entry.status().await);
        }
        out
    }

    pub fn connected_count(&self) -> usize {
        self.supervisors.iter().filter(|e| e.is_connected()).count()
    }
}
