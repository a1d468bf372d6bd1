// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Stdio transport: a child process speaking newline-delimited JSON-RPC.
//!
//! A writer task owns the child's stdin and a reader task owns its stdout.
//! Requests register a `oneshot` under their id before being written; the
//! reader routes each response to the matching sender, so any number of
//! requests can be in flight on one process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{expand_env_vars, ProviderConfig};

use super::error::TransportError;
use super::jsonrpc::{self, RpcChannel};
use super::types::ToolOutput;
use super::{Connection, Connector, Handshake};

/// Grace period for the child to exit after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Outbound message queue depth.
const WRITE_QUEUE: usize = 100;

/// Requests waiting for responses, and whether the reader has finished.
#[derive(Default)]
struct PendingRequests {
    waiters: HashMap<u64, oneshot::Sender<Value>>,
    closed: bool,
}

impl PendingRequests {
    /// Fail every waiter and refuse new ones.
    fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

type PendingMap = Arc<Mutex<PendingRequests>>;

/// Opens [`StdioConnection`]s by spawning the provider command.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl Connector for StdioConnector {
    async fn open(
        &self,
        provider: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        Ok(Box::new(StdioConnection::spawn(provider, config)?))
    }
}

/// A live child-process connection.
pub struct StdioConnection {
    /// Provider name.
    provider: String,
    /// Request ID counter.
    request_id: AtomicU64,
    /// Requests waiting for responses.
    pending: PendingMap,
    /// Outbound message queue; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<String>>>,
    /// Provider process.
    child: Mutex<Option<Child>>,
    /// Reader, writer and stderr tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioConnection {
    /// Spawn the provider process and its IO tasks on the current runtime.
    pub fn spawn(provider: &str, config: &ProviderConfig) -> Result<Self, TransportError> {
        let program = config
            .command
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TransportError::Config("stdio transport requires a command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            cmd.env(key, expand_env_vars(value));
        }
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::connection_failed(program, e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::connection_failed(program, "failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::connection_failed(program, "failed to get stdout"))?;
        let stderr = child.stderr.take();

        let (tx, mut rx) = mpsc::channel::<String>(WRITE_QUEUE);
        let pending: PendingMap = Arc::new(Mutex::new(PendingRequests::default()));
        let mut tasks = Vec::with_capacity(3);

        let mut writer = stdin;
        tasks.push(tokio::spawn(async move {
            while let Some(mut msg) = rx.recv().await {
                msg.push('\n');
                if writer.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        }));

        tasks.push(tokio::spawn(Self::read_messages(
            provider.to_string(),
            BufReader::new(stdout),
            Arc::clone(&pending),
            tx.downgrade(),
        )));

        if let Some(stderr) = stderr {
            let name = provider.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(provider = %name, "stderr: {}", line);
                }
            }));
        }

        tracing::debug!(provider = %provider, command = %program, "spawned stdio provider");

        Ok(Self {
            provider: provider.to_string(),
            request_id: AtomicU64::new(1),
            pending,
            tx: Mutex::new(Some(tx)),
            child: Mutex::new(Some(child)),
            tasks: Mutex::new(tasks),
        })
    }

    /// Route responses to pending requests until stdout closes.
    async fn read_messages(
        provider: String,
        reader: BufReader<ChildStdout>,
        pending: PendingMap,
        tx: mpsc::WeakSender<String>,
    ) {
        let mut lines = reader.lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(provider = %provider, error = %e, "stdout read failed");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!(provider = %provider, "ignoring non-JSON line on stdout");
                    continue;
                }
            };

            if let Some(id) = jsonrpc::response_id(&message) {
                let sender = pending.lock().waiters.remove(&id);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(message);
                    }
                    None => tracing::debug!(provider = %provider, id, "response for unknown request"),
                }
                continue;
            }

            // Server-initiated request: answer ping, reject everything else.
            if let (Some(id), Some(method)) = (
                message.get("id").cloned(),
                message.get("method").and_then(Value::as_str),
            ) {
                let reply = if method == "ping" {
                    json!({ "jsonrpc": jsonrpc::JSONRPC_VERSION, "id": id, "result": {} })
                } else {
                    json!({
                        "jsonrpc": jsonrpc::JSONRPC_VERSION,
                        "id": id,
                        "error": { "code": -32601, "message": format!("Method not found: {method}") }
                    })
                };
                // The outbound queue only lives while the connection holds it.
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(reply.to_string()).await;
                }
            }
        }

        pending.lock().close();
        tracing::debug!(provider = %provider, "stdio reader finished");
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, TransportError> {
        self.tx.lock().clone().ok_or(TransportError::Closed)
    }
}

/// Removes a pending entry if the request future is dropped early.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().waiters.remove(&self.id);
    }
}

#[async_trait]
impl RpcChannel for StdioConnection {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let msg = serde_json::to_string(&jsonrpc::request(id, method, params))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(TransportError::Closed);
            }
            pending.waiters.insert(id, resp_tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.sender()?
            .send(msg)
            .await
            .map_err(|_| TransportError::Closed)?;

        let response = resp_rx.await.map_err(|_| TransportError::Closed)?;
        jsonrpc::into_result(response)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let msg = serde_json::to_string(&jsonrpc::notification(method, params))?;
        self.sender()?
            .send(msg)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Connection for StdioConnection {
    async fn initialize(&self) -> Result<Handshake, TransportError> {
        jsonrpc::handshake(self, &self.provider).await
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutput, TransportError> {
        jsonrpc::call_tool(self, tool, args).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Closing stdin ends the protocol session.
        drop(self.tx.lock().take());
        self.pending.lock().close();

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(provider = %self.provider, %status, "stdio provider exited");
                }
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_) => {
                    tracing::debug!(provider = %self.provider, "stdio provider still running, killing");
                    child.kill().await?;
                }
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for StdioConnection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
