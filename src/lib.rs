// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge - blocking tool calls over long-lived provider sessions.
//!
//! Tool providers (MCP servers) speak an asynchronous duplex protocol and
//! live for the whole run. Toolbridge gives each provider its own event loop
//! on a dedicated thread and exposes a plain synchronous surface, so a
//! synchronous agent loop can call tools from any thread.
//!
//! # Architecture
//!
//! - [`carrier`] - a background thread running a current-thread runtime, with
//!   a blocking submit-and-wait bridge
//! - [`session`] - one provider: connect, initialize, call, disconnect
//! - [`manager`] - all providers: bulk lifecycle, tool routing, function specs
//! - [`transport`] - the connection seam plus the stdio and HTTP adapters
//! - [`config`] - provider configuration from JSON or YAML
//! - [`error`] - error types and result aliases
//! - [`telemetry`] - tracing setup and metrics
//!
//! # Threads
//!
//! With N providers connected there are N + 1 background threads: one per
//! session and one for the manager's bulk operations. Callers never run an
//! event loop themselves; every blocking call carries a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge::{BridgeConfig, SessionManager};
//!
//! let config = toolbridge::config::load_config(None, std::path::Path::new("."))?;
//! let manager = SessionManager::new(config);
//! manager.connect_all()?;
//!
//! for (name, description) in manager.list_all_tools() {
//!     println!("{name}: {description}");
//! }
//!
//! manager.shutdown()?;
//! ```

pub mod carrier;
pub mod config;
pub mod error;
pub mod manager;
pub mod session;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types at crate root
pub use carrier::{CarrierError, EventLoopCarrier};
pub use config::{BridgeConfig, ProviderConfig, TransportType};
pub use error::{AggregateError, BridgeError, ConfigError, ErrorKind, ProviderFailure, Result};
pub use manager::{ManagerOptions, RoutingTable, SessionManager};
pub use session::{Session, SessionState};
pub use transport::{
    Connection, Connector, Handshake, ToolDescriptor, ToolOutput, TransportConnector,
    TransportError,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
