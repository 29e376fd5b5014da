//! Child-process stdio transport.
//!
//! Frames are newline-delimited JSON on the child's stdout. stderr is
//! inherited and treated as diagnostic-only log output, never parsed.

use std::collections::HashMap;
use std::process::Stdio as StdStdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};

use super::jsonrpc::{InboundFrame, JsonRpcError, JsonRpcRequest, RequestId};
use super::{Transport, TransportEvent, TransportShared};
use crate::error::{RelayError, RelayResult};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// How long to wait after spawn for the child to prove it's still alive.
/// Startup success is the spawn signal, not an exit, so this only needs to
/// catch the immediate-crash case (wrong binary, missing args) before the
/// supervisor commits to CONNECTED.
const SPAWN_GRACE: Duration = Duration::from_millis(150);

type PendingMap = Arc<DashMap<RequestId, oneshot::Sender<Result<Value, JsonRpcError>>>>;

pub struct StdioTransport {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    shared: TransportShared,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
}

impl StdioTransport {
    pub fn new(
        server_name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args,
            env,
            shared: TransportShared::new(),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
        }
    }
}

async fn read_loop(
    server_name: String,
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    events: broadcast::Sender<TransportEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let frame: InboundFrame = match serde_json::from_str(&line) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(server = %server_name, error = %e, "failed to parse frame, dropping message");
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
            Ok(None) => {
                let _ = events.send(TransportEvent::Closed {
                    reason: "stdout closed".to_string(),
                });
                break;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Closed {
                    reason: format!("read error: {e}"),
                });
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> RelayResult<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(StdStdio::piped())
            .stdout(StdStdio::piped())
            .stderr(StdStdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RelayError::ConnectionFailed {
            server: self.server_name.clone(),
            detail: format!("failed to spawn '{}': {e}", self.command),
        })?;

        // A successful spawn only means the OS accepted the exec; a wrong
        // binary or crashing server can still exit within milliseconds. Any
        // exit observed inside this grace window is a connect failure, not
        // a successful startup.
        match tokio::time::timeout(SPAWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                return Err(RelayError::ConnectionFailed {
                    server: self.server_name.clone(),
                    detail: format!("child exited immediately with {status}"),
                });
            }
            Ok(Err(e)) => {
                return Err(RelayError::ConnectionFailed {
                    server: self.server_name.clone(),
                    detail: format!("failed to observe child status: {e}"),
                });
            }
            Err(_) => {
                // Timed out waiting, i.e. the child is still running.
            }
        }

        let stdout = child.stdout.take().ok_or_else(|| RelayError::ConnectionFailed {
            server: self.server_name.clone(),
            detail: "child process did not provide a stdout handle".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| RelayError::ConnectionFailed {
            server: self.server_name.clone(),
            detail: "child process did not provide a stdin handle".to_string(),
        })?;

        tokio::spawn(read_loop(
            self.server_name.clone(),
            stdout,
            Arc::clone(&self.pending),
            self.shared.events.clone(),
        ));

        *self.stdin.lock() = Some(stdin);
        *self.child.lock() = Some(child);
        Ok(())
    }

    async fn disconnect(&self) {
        let stdin = self.stdin.lock().take();
        drop(stdin);
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.start_kill();
                }
            }
        }
        self.pending.clear();
    }

    async fn send(&self, method: &str, params: Option<Value>) -> RelayResult<Value> {
        let id = self.shared.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut guard = self.stdin.lock();
            let stdin = guard.as_mut().ok_or_else(|| RelayError::Transport {
                server: self.server_name.clone(),
                detail: "not connected".to_string(),
            })?;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| RelayError::Transport {
                    server: self.server_name.clone(),
                    detail: format!("write failed: {e}"),
                })?;
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RelayError::Transport {
                server: self.server_name.clone(),
                detail: e.to_string(),
            }),
            Err(_) => {
                self.pending.remove(&id);
                Err(RelayError::Transport {
                    server: self.server_name.clone(),
                    detail: "connection closed while request was pending".to_string(),
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
