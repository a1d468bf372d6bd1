// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session manager: many providers behind one synchronous tool surface.
//!
//! The manager owns one [`Session`] per enabled provider, in configuration
//! order, and a routing table from tool name to provider. Bulk operations
//! run on the manager's own carrier and reach the sessions' blocking API
//! through the runtime's blocking pool.
//!
//! ```text
//! caller ── connect_all ──► manager carrier ── spawn_blocking ──► session.connect()
//!                                                                session.initialize()
//!                                                                (each on its own carrier)
//! caller ── call_tool ────► routing table ──► session.call_tool()
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge::{BridgeConfig, SessionManager};
//!
//! let config = BridgeConfig::from_json(r#"{"mcpServers": {"browser": {"url": "http://localhost:8931/mcp"}}}"#)?;
//! let manager = SessionManager::new(config);
//! manager.connect_all()?;
//! let output = manager.call_tool("browser_navigate", serde_json::json!({"url": "https://example.com"}))?;
//! manager.shutdown()?;
//! ```

mod routing;

pub use routing::RoutingTable;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::carrier::{CarrierError, EventLoopCarrier, DEFAULT_JOIN_TIMEOUT};
use crate::config::BridgeConfig;
use crate::error::{AggregateError, BridgeError, ProviderFailure};
use crate::session::{Session, SessionState};
use crate::telemetry::Metrics;
use crate::transport::{Connector, ToolDescriptor, ToolOutput, TransportConnector};

/// Name of the manager's own carrier, used as the provider name when the
/// manager itself fails.
pub const MANAGER_NAME: &str = "session-manager";

/// Slack added to the computed bound on a bulk operation.
const BULK_SLACK: Duration = Duration::from_secs(5);

/// Options for building a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Shared metrics collector.
    pub metrics: Arc<Metrics>,

    /// Bound on joining each carrier thread.
    pub join_timeout: Duration,

    /// Bound on a whole bulk operation. Computed from provider timeouts when unset.
    pub bulk_timeout: Option<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            metrics: Arc::new(Metrics::new()),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            bulk_timeout: None,
        }
    }
}

impl ManagerOptions {
    /// Use `metrics` instead of a private collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the carrier join bound.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the bulk operation bound.
    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = Some(timeout);
        self
    }
}

/// Aggregates provider sessions and routes tool calls by name.
pub struct SessionManager {
    /// Sessions in configuration order.
    sessions: Vec<Arc<Session>>,

    /// Tool name to provider name.
    routes: Arc<RwLock<RoutingTable>>,

    /// Runs bulk fan-out operations.
    carrier: EventLoopCarrier,

    /// Build options.
    options: ManagerOptions,
}

impl SessionManager {
    /// Build a manager using the built-in transports.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_connector(config, Arc::new(TransportConnector), ManagerOptions::default())
    }

    /// Build a manager whose sessions open connections through `connector`.
    pub fn with_connector(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
    ) -> Self {
        let sessions = config
            .enabled_providers()
            .map(|(name, provider)| {
                Arc::new(
                    Session::new(name.clone(), provider.clone(), Arc::clone(&connector))
                        .with_metrics(Arc::clone(&options.metrics))
                        .with_join_timeout(options.join_timeout),
                )
            })
            .collect::<Vec<_>>();

        tracing::debug!(providers = sessions.len(), "session manager created");

        Self {
            sessions,
            routes: Arc::new(RwLock::new(RoutingTable::new())),
            carrier: EventLoopCarrier::new(MANAGER_NAME).with_join_timeout(options.join_timeout),
            options,
        }
    }

    /// Connect and initialize every provider in configuration order.
    ///
    /// Every provider is attempted. Providers that succeed stay connected
    /// even when others fail; the error names each failed provider.
    pub fn connect_all(&self) -> Result<(), AggregateError> {
        let sessions = self.sessions.clone();
        let routes = Arc::clone(&self.routes);
        let failures = self.run_bulk("connect_all", move || connect_in_order(&sessions, &routes));

        let ready = self.sessions.iter().filter(|s| s.is_ready()).count();
        tracing::info!(
            ready,
            failed = failures.len(),
            tools = self.routes.read().len(),
            "connect_all finished"
        );
        into_result("connect_all", failures)
    }

    /// Disconnect every provider in reverse configuration order and clear
    /// the routing table.
    pub fn disconnect_all(&self) -> Result<(), AggregateError> {
        let sessions = self.sessions.clone();
        let routes = Arc::clone(&self.routes);
        let failures = self.run_bulk("disconnect_all", move || {
            let failures = disconnect_in_reverse(&sessions);
            routes.write().clear();
            failures
        });
        // Routes go even if the bulk run itself failed.
        self.routes.write().clear();
        into_result("disconnect_all", failures)
    }

    /// Disconnect everything, then stop the manager carrier.
    pub fn shutdown(&self) -> Result<(), AggregateError> {
        let mut failures = match self.disconnect_all() {
            Ok(()) => Vec::new(),
            Err(aggregate) => aggregate.failures,
        };

        if let Err(e) = self.carrier.stop() {
            failures.push(ProviderFailure {
                provider: MANAGER_NAME.to_string(),
                error: BridgeError::Carrier(e),
            });
        }

        tracing::info!(failed = failures.len(), "session manager shut down");
        into_result("shutdown", failures)
    }

    /// Call a tool by name with the provider's tool timeout.
    pub fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput, BridgeError> {
        self.dispatch(name, args, None)
    }

    /// Call a tool by name with an explicit deadline.
    pub fn call_tool_with_timeout(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<ToolOutput, BridgeError> {
        self.dispatch(name, args, Some(timeout))
    }

    fn dispatch(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, BridgeError> {
        let session = self
            .provider_for(name)
            .and_then(|provider| self.session(&provider).cloned())
            .ok_or_else(|| BridgeError::Routing(name.to_string()));

        let session = match session {
            Ok(session) => session,
            Err(err) => {
                #[cfg(feature = "telemetry")]
                self.options.metrics.record_failure(err.kind());
                return Err(err);
            }
        };

        #[cfg(feature = "telemetry")]
        self.options.metrics.record_routed_call();

        session.call_tool(name, args, timeout)
    }

    /// Every routed tool's description, keyed by tool name.
    ///
    /// On a name collision the later provider's description wins, matching
    /// the routing table.
    pub fn list_all_tools(&self) -> BTreeMap<String, String> {
        self.merged_tools()
            .into_iter()
            .map(|(name, tool)| (name, tool.description))
            .collect()
    }

    /// Every routed tool, keyed by tool name.
    pub fn all_tools(&self) -> BTreeMap<String, ToolDescriptor> {
        self.merged_tools()
    }

    /// Every routed tool in the chat-completion `function` format, sorted by name.
    pub fn function_specs(&self) -> Vec<Value> {
        self.merged_tools()
            .values()
            .map(ToolDescriptor::to_function_spec)
            .collect()
    }

    fn merged_tools(&self) -> BTreeMap<String, ToolDescriptor> {
        let mut merged = BTreeMap::new();
        for session in &self.sessions {
            for tool in session.list_tools() {
                merged.insert(tool.name.clone(), tool);
            }
        }
        merged
    }

    /// Provider serving `tool`.
    pub fn provider_for(&self, tool: &str) -> Option<String> {
        self.routes.read().resolve(tool).map(str::to_string)
    }

    /// Snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.routes.read().clone()
    }

    /// Provider names in configuration order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.name()).collect()
    }

    /// Session for a provider.
    pub fn session(&self, name: &str) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Every provider's state, in configuration order.
    pub fn states(&self) -> Vec<(String, SessionState)> {
        self.sessions
            .iter()
            .map(|s| (s.name().to_string(), s.state()))
            .collect()
    }

    /// Shared metrics collector.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.options.metrics
    }

    /// Run `work` on the blocking pool of the manager carrier.
    ///
    /// A failure of the manager itself is reported as a failure of
    /// [`MANAGER_NAME`]. If the carrier cannot start, `work` runs on the
    /// calling thread instead.
    fn run_bulk<F>(&self, operation: &'static str, work: F) -> Vec<ProviderFailure>
    where
        F: FnOnce() -> Vec<ProviderFailure> + Send + 'static,
    {
        if let Err(e) = self.carrier.start() {
            tracing::error!(operation, error = %e, "manager carrier unavailable, running inline");
            let mut failures = vec![manager_failure(BridgeError::Carrier(e))];
            failures.extend(work());
            return failures;
        }

        let result: Result<Vec<ProviderFailure>, BridgeError> =
            self.carrier.run(self.bulk_timeout(), async move {
                tokio::task::spawn_blocking(work)
                    .await
                    .map_err(|e| {
                        let err = if e.is_panic() {
                            CarrierError::TaskPanicked(format!("{operation} worker panicked"))
                        } else {
                            CarrierError::TaskCancelled
                        };
                        BridgeError::Carrier(err)
                    })
            });

        match result {
            Ok(failures) => failures,
            Err(err) => vec![manager_failure(err.label_timeout(operation))],
        }
    }

    fn bulk_timeout(&self) -> Duration {
        self.options.bulk_timeout.unwrap_or_else(|| {
            self.sessions
                .iter()
                .map(|s| s.config().startup_timeout() * 2 + self.options.join_timeout)
                .sum::<Duration>()
                + BULK_SLACK
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let live = self.carrier.is_running()
            || self
                .sessions
                .iter()
                .any(|s| s.state() != SessionState::Disconnected);
        if live {
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "shutdown during drop failed");
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions)
            .field("routes", &self.routes.read().len())
            .finish()
    }
}

/// Connect and initialize each session in order, rebuilding routes after
/// each success.
fn connect_in_order(sessions: &[Arc<Session>], routes: &RwLock<RoutingTable>) -> Vec<ProviderFailure> {
    let mut failures = Vec::new();

    for session in sessions {
        let result = session.connect().and_then(|()| {
            if session.state() == SessionState::Connected {
                session.initialize()
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => rebuild_routes(sessions, routes),
            Err(error) => {
                tracing::warn!(provider = %session.name(), %error, "provider failed to start");
                failures.push(ProviderFailure {
                    provider: session.name().to_string(),
                    error,
                });
            }
        }
    }

    rebuild_routes(sessions, routes);
    failures
}

/// Disconnect each session in reverse order.
fn disconnect_in_reverse(sessions: &[Arc<Session>]) -> Vec<ProviderFailure> {
    let mut failures = Vec::new();
    for session in sessions.iter().rev() {
        if let Err(error) = session.disconnect() {
            tracing::warn!(provider = %session.name(), %error, "provider failed to disconnect");
            failures.push(ProviderFailure {
                provider: session.name().to_string(),
                error,
            });
        }
    }
    failures
}

fn rebuild_routes(sessions: &[Arc<Session>], routes: &RwLock<RoutingTable>) {
    let catalogs: Vec<(&str, Vec<ToolDescriptor>)> = sessions
        .iter()
        .filter(|s| s.is_ready())
        .map(|s| (s.name(), s.list_tools()))
        .collect();
    let table = RoutingTable::build(catalogs.iter().map(|(name, tools)| (*name, tools.as_slice())));
    *routes.write() = table;
}

fn manager_failure(error: BridgeError) -> ProviderFailure {
    ProviderFailure {
        provider: MANAGER_NAME.to_string(),
        error,
    }
}

fn into_result(operation: &'static str, failures: Vec<ProviderFailure>) -> Result<(), AggregateError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AggregateError::new(operation, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::error::ErrorKind;
    use crate::transport::{Connection, Handshake, MockConnection, MockConnector, TransportError};
    use serde_json::json;

    fn config(names: &[&str]) -> BridgeConfig {
        names.iter().fold(BridgeConfig::new(), |config, name| {
            config.with_provider(*name, ProviderConfig::stdio("unused"))
        })
    }

    /// Each provider offers `shared` plus `<provider>_only`.
    fn mock_connector(failing: &'static [&'static str]) -> Arc<dyn Connector> {
        let mut connector = MockConnector::new();
        connector.expect_open().returning(move |provider, _| {
            if failing.iter().any(|f| *f == provider) {
                return Err(TransportError::connection_failed(provider, "refused"));
            }
            let provider = provider.to_string();
            let mut conn = MockConnection::new();
            let owner = provider.clone();
            conn.expect_initialize().returning(move || {
                Ok(Handshake {
                    server_info: Default::default(),
                    tools: vec![
                        ToolDescriptor::new("shared", &owner).with_description(format!("from {owner}")),
                        ToolDescriptor::new(format!("{owner}_only"), &owner),
                    ],
                })
            });
            conn.expect_invoke()
                .returning(move |tool, _| Ok(ToolOutput::text(format!("{provider}:{tool}"))));
            conn.expect_close().returning(|| Ok(()));
            Ok(Box::new(conn) as Box<dyn Connection>)
        });
        Arc::new(connector)
    }

    #[test]
    fn test_new_skips_disabled_providers() {
        let mut off = ProviderConfig::stdio("unused");
        off.enabled = false;
        let config = config(&["a", "b"]).with_provider("off", off);
        let manager = SessionManager::with_connector(config, mock_connector(&[]), ManagerOptions::default());
        assert_eq!(manager.provider_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_connect_all_routes_and_collides() {
        let manager = SessionManager::with_connector(
            config(&["a", "b"]),
            mock_connector(&[]),
            ManagerOptions::default(),
        );
        manager.connect_all().unwrap();

        assert_eq!(manager.provider_for("shared").as_deref(), Some("b"));
        assert_eq!(manager.provider_for("a_only").as_deref(), Some("a"));

        let tools = manager.list_all_tools();
        assert_eq!(tools.get("shared").map(String::as_str), Some("from b"));
        assert_eq!(tools.len(), 3);

        let output = manager.call_tool("a_only", json!({})).unwrap();
        assert_eq!(output.as_text(), "a:a_only");
        let output = manager.call_tool("shared", json!({})).unwrap();
        assert_eq!(output.as_text(), "b:shared");

        manager.shutdown().unwrap();
        assert!(manager.routing_table().is_empty());
    }

    #[test]
    fn test_partial_failure_aggregates() {
        let manager = SessionManager::with_connector(
            config(&["a", "b", "c"]),
            mock_connector(&["b"]),
            ManagerOptions::default(),
        );

        let err = manager.connect_all().unwrap_err();
        assert_eq!(err.operation, "connect_all");
        assert_eq!(err.providers(), vec!["b"]);
        assert_eq!(err.first().unwrap().error.kind(), ErrorKind::Connection);

        let states = manager.states();
        assert_eq!(states[0].1, SessionState::Ready);
        assert_eq!(states[1].1, SessionState::Disconnected);
        assert_eq!(states[2].1, SessionState::Ready);
        assert!(manager.list_all_tools().keys().all(|t| !t.starts_with("b_")));

        manager.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_tool_is_routing_error() {
        let manager = SessionManager::with_connector(config(&["a"]), mock_connector(&[]), ManagerOptions::default());
        let err = manager.call_tool("nope", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);
        #[cfg(feature = "telemetry")]
        assert_eq!(manager.metrics().failure_count(ErrorKind::Routing), 1);
    }

    #[test]
    fn test_function_specs() {
        let manager = SessionManager::with_connector(config(&["a"]), mock_connector(&[]), ManagerOptions::default());
        manager.connect_all().unwrap();

        let specs = manager.function_specs();
        let names: Vec<_> = specs
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_only", "shared"]);
        assert!(specs.iter().all(|s| s["type"] == "function"));
        manager.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let manager = SessionManager::with_connector(config(&["a"]), mock_connector(&[]), ManagerOptions::default());
        manager.connect_all().unwrap();
        manager.shutdown().unwrap();
        manager.shutdown().unwrap();
        assert!(manager.states().iter().all(|(_, s)| *s == SessionState::Disconnected));
    }

    #[test]
    fn test_bulk_timeout_from_provider_timeouts() {
        let config = BridgeConfig::new()
            .with_provider("a", ProviderConfig::stdio("x").with_startup_timeout_sec(10))
            .with_provider("b", ProviderConfig::stdio("x").with_startup_timeout_sec(20));
        let options = ManagerOptions::default().with_join_timeout(Duration::from_secs(1));
        let manager = SessionManager::with_connector(config, mock_connector(&[]), options);
        assert_eq!(manager.bulk_timeout(), Duration::from_secs(20 + 1 + 40 + 1 + 5));

        let options = ManagerOptions::default().with_bulk_timeout(Duration::from_secs(3));
        let manager = SessionManager::with_connector(BridgeConfig::new(), mock_connector(&[]), options);
        assert_eq!(manager.bulk_timeout(), Duration::from_secs(3));
    }
}
