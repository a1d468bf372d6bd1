// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider sessions.
//!
//! A [`Session`] owns one [`EventLoopCarrier`] and the connection to one
//! provider. Every method is synchronous for the caller; the network work is
//! marshaled onto the carrier with a deadline.
//!
//! Lifecycle methods (`connect`, `initialize`, `disconnect`) serialize on an
//! internal handshake lock. `call_tool` does not take it, so calls on a
//! ready session may overlap each other.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolbridge::config::ProviderConfig;
//! use toolbridge::session::Session;
//! use toolbridge::transport::TransportConnector;
//!
//! let session = Session::new(
//!     "fs",
//!     ProviderConfig::stdio("npx").with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]),
//!     Arc::new(TransportConnector),
//! );
//! session.connect()?;
//! session.initialize()?;
//! let output = session.call_tool("list_directory", serde_json::json!({"path": "/tmp"}), None)?;
//! session.disconnect()?;
//! ```

mod state;

pub use state::SessionState;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::instrument;

use crate::carrier::EventLoopCarrier;
use crate::config::ProviderConfig;
use crate::error::BridgeError;
use crate::telemetry::Metrics;
use crate::transport::{Connection, Connector, ServerInfo, ToolDescriptor, ToolOutput, TransportError};

/// A synchronous session with one tool provider.
pub struct Session {
    /// Provider name.
    name: String,

    /// Provider configuration.
    config: ProviderConfig,

    /// Opens the connection.
    connector: Arc<dyn Connector>,

    /// Background event loop all network work runs on.
    carrier: EventLoopCarrier,

    /// Current lifecycle state.
    state: RwLock<SessionState>,

    /// Open connection, present from `Connected` on.
    connection: RwLock<Option<Arc<dyn Connection>>>,

    /// Discovered tools in provider order, filtered by configuration.
    tools: RwLock<Vec<ToolDescriptor>>,

    /// Server information from the handshake.
    server_info: RwLock<Option<ServerInfo>>,

    /// Serializes lifecycle transitions.
    handshake_lock: Mutex<()>,

    /// Shared metrics collector.
    metrics: Option<Arc<Metrics>>,
}

impl Session {
    /// Create a disconnected session. No thread is started until `connect`.
    pub fn new(name: impl Into<String>, config: ProviderConfig, connector: Arc<dyn Connector>) -> Self {
        let name = name.into();
        Self {
            carrier: EventLoopCarrier::new(format!("session-{name}")),
            name,
            config,
            connector,
            state: RwLock::new(SessionState::Disconnected),
            connection: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
            handshake_lock: Mutex::new(()),
            metrics: None,
        }
    }

    /// Record lifecycle and tool metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bound the carrier thread join during `disconnect`.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.carrier = EventLoopCarrier::new(format!("session-{}", self.name)).with_join_timeout(timeout);
        self
    }

    /// Get the provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Check if tools may be called.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Server information from the last successful handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Check if the session's carrier thread is running.
    pub fn carrier_running(&self) -> bool {
        self.carrier.is_running()
    }

    /// Open the connection. No-op unless disconnected.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub fn connect(&self) -> Result<(), BridgeError> {
        let _guard = self.handshake_lock.lock();

        let state = self.state();
        if state != SessionState::Disconnected {
            tracing::debug!(%state, "connect skipped");
            return Ok(());
        }

        let started = Instant::now();
        self.carrier.start()?;
        self.set_state(SessionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let provider = self.name.clone();
        let config = self.config.clone();
        let result = self.carrier.run(self.config.startup_timeout(), async move {
            let opened = connector.open(&provider, &config).await;
            opened.map_err(|e| BridgeError::connection(provider, e))
        });

        match result {
            Ok(connection) => {
                *self.connection.write() = Some(Arc::from(connection));
                self.set_state(SessionState::Connected);
                self.record_operation("session.connect", started);
                tracing::info!(
                    transport = %self.config.transport_type(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "provider connected"
                );
                Ok(())
            }
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                if let Err(stop_err) = self.carrier.stop() {
                    tracing::warn!(error = %stop_err, "carrier stop failed after connect failure");
                }
                let err = err.label_timeout(format!("connect to '{}'", self.name));
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Run the handshake and discover tools. Requires `Connected`.
    ///
    /// On failure the connection is torn down and the session returns to
    /// `Disconnected`.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let _guard = self.handshake_lock.lock();

        let state = self.state();
        let connection = match (state, self.connection.read().clone()) {
            (SessionState::Connected, Some(connection)) => connection,
            (actual, _) => return Err(self.precondition("initialize", SessionState::Connected, actual)),
        };

        let started = Instant::now();
        self.set_state(SessionState::Initializing);

        let provider = self.name.clone();
        let result = self.carrier.run(self.config.startup_timeout(), async move {
            let handshake = connection.initialize().await;
            handshake.map_err(|e| BridgeError::handshake(provider, e))
        });

        match result {
            Ok(handshake) => {
                let discovered = handshake.tools.len();
                let tools = self.filter_tools(handshake.tools);
                tracing::info!(
                    server = %handshake.server_info.name,
                    version = %handshake.server_info.version,
                    tools = tools.len(),
                    filtered = discovered - tools.len(),
                    "provider ready"
                );
                *self.tools.write() = tools;
                *self.server_info.write() = Some(handshake.server_info);
                self.set_state(SessionState::Ready);
                self.record_operation("session.initialize", started);
                Ok(())
            }
            Err(err) => {
                if let Err(teardown_err) = self.teardown() {
                    tracing::warn!(error = %teardown_err, "teardown after failed handshake");
                }
                let err = err.label_timeout(format!("initialize '{}'", self.name));
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Tools discovered by the last handshake; empty unless `Ready`.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        if !self.is_ready() {
            return Vec::new();
        }
        self.tools.read().clone()
    }

    /// Check if the session offers `tool`.
    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.read().iter().any(|t| t.name == tool)
    }

    /// Call a tool. Requires `Ready`.
    ///
    /// `timeout` falls back to the provider's tool timeout. A tool that
    /// reports failure surfaces as [`BridgeError::RemoteTool`].
    #[instrument(skip(self, args), fields(provider = %self.name))]
    pub fn call_tool(
        &self,
        tool: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, BridgeError> {
        let state = self.state();
        let connection = match (state, self.connection.read().clone()) {
            (SessionState::Ready, Some(connection)) => connection,
            (actual, _) => return Err(self.precondition("call_tool", SessionState::Ready, actual)),
        };
        if !self.has_tool(tool) {
            return Err(BridgeError::Routing(format!("{tool} (provider '{}')", self.name)));
        }

        let timeout = timeout.unwrap_or_else(|| self.config.tool_timeout());
        let started = Instant::now();
        let provider = self.name.clone();
        let name = tool.to_string();

        let result = self.carrier.run(timeout, async move {
            let output = connection
                .invoke(&name, args)
                .await
                .map_err(|e| BridgeError::remote_tool(provider.clone(), name.clone(), e))?;
            if output.is_error {
                return Err(BridgeError::remote_tool(
                    provider,
                    name,
                    TransportError::ToolReported(output.as_text()),
                ));
            }
            Ok(output)
        });

        self.record_tool(tool, started, result.is_ok());
        result.map_err(|err| {
            let err = err.label_timeout(format!("tools/call '{tool}' on '{}'", self.name));
            tracing::debug!(error = %err, "tool call failed");
            self.record_failure(&err);
            err
        })
    }

    /// Close the connection and stop the carrier. Idempotent.
    ///
    /// The session is `Disconnected` afterwards even when closing fails.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub fn disconnect(&self) -> Result<(), BridgeError> {
        let _guard = self.handshake_lock.lock();
        let started = Instant::now();
        let result = self.teardown();
        self.record_operation("session.disconnect", started);
        if let Err(err) = &result {
            self.record_failure(err);
        }
        result
    }

    /// Close, reset, stop. Caller holds the handshake lock.
    fn teardown(&self) -> Result<(), BridgeError> {
        let connection = self.connection.write().take();

        let closed = match connection {
            Some(connection) if self.carrier.is_running() => {
                let provider = self.name.clone();
                // The connection is dropped on the carrier when the task ends.
                self.carrier
                    .run(self.config.startup_timeout(), async move {
                        let closed = connection.close().await;
                        closed.map_err(|e| BridgeError::connection(provider, e))
                    })
                    .map_err(|e| e.label_timeout(format!("close '{}'", self.name)))
            }
            Some(_) => {
                tracing::debug!("carrier already stopped; dropping connection");
                Ok(())
            }
            None => Ok(()),
        };

        self.tools.write().clear();
        *self.server_info.write() = None;
        if self.state() != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
        }

        if let Err(err) = &closed {
            tracing::warn!(error = %err, "provider close failed");
        }

        let stopped = self.carrier.stop().map_err(BridgeError::from);
        closed.and(stopped)
    }

    fn filter_tools(&self, discovered: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = Vec::with_capacity(discovered.len());
        for mut tool in discovered {
            if !self.config.is_tool_enabled(&tool.name) {
                tracing::debug!(tool = %tool.name, "tool disabled by configuration");
                continue;
            }
            tool.provider = self.name.clone();
            match tools.iter_mut().find(|t| t.name == tool.name) {
                Some(existing) => *existing = tool,
                None => tools.push(tool),
            }
        }
        tools
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        debug_assert!(
            state.can_transition_to(next),
            "illegal session transition {} -> {}",
            *state,
            next
        );
        tracing::debug!(provider = %self.name, from = %*state, to = %next, "session state");
        *state = next;
    }

    fn precondition(
        &self,
        operation: &'static str,
        expected: SessionState,
        actual: SessionState,
    ) -> BridgeError {
        BridgeError::Precondition {
            provider: self.name.clone(),
            operation,
            expected,
            actual,
        }
    }

    fn record_operation(&self, operation: &str, started: Instant) {
        #[cfg(feature = "telemetry")]
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, started.elapsed());
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = (operation, started);
    }

    fn record_tool(&self, tool: &str, started: Instant, success: bool) {
        #[cfg(feature = "telemetry")]
        if let Some(metrics) = &self.metrics {
            metrics.record_tool(&self.name, tool, started.elapsed(), success);
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = (tool, started, success);
    }

    fn record_failure(&self, err: &BridgeError) {
        #[cfg(feature = "telemetry")]
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(err.kind());
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = err;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() != SessionState::Disconnected {
            let _guard = self.handshake_lock.lock();
            if let Err(e) = self.teardown() {
                tracing::warn!(provider = %self.name, error = %e, "teardown during drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("tools", &self.tools.read().len())
            .field("carrier", &self.carrier)
            .finish()
    }
}
