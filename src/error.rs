// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the tool bridge.
//!
//! Every failure a caller can observe is classified by [`ErrorKind`], so an
//! agent loop can decide whether to retry, skip, or abort without string
//! matching. Uses `thiserror` for the typed errors and `anyhow` only for the
//! crate-level [`Result`] alias used at the binary edge.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::carrier::CarrierError;
use crate::session::SessionState;
use crate::transport::TransportError;

/// Discriminant for [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A lifecycle method was called out of order.
    Precondition,
    /// Opening or closing the provider connection failed.
    Connection,
    /// The protocol handshake failed after the connection was opened.
    Handshake,
    /// The tool name is not in the routing table.
    Routing,
    /// The provider executed the call but reported failure, or the call
    /// could not be delivered.
    RemoteTool,
    /// A caller-imposed deadline elapsed.
    Timeout,
    /// A background thread failed to start, stop, or join.
    Carrier,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition => write!(f, "precondition"),
            Self::Connection => write!(f, "connection"),
            Self::Handshake => write!(f, "handshake"),
            Self::Routing => write!(f, "routing"),
            Self::RemoteTool => write!(f, "remote_tool"),
            Self::Timeout => write!(f, "timeout"),
            Self::Carrier => write!(f, "carrier"),
        }
    }
}

/// Errors surfaced by sessions and the session manager.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Provider '{provider}' cannot {operation}: expected state {expected}, found {actual}")]
    Precondition {
        provider: String,
        operation: &'static str,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Connection to provider '{provider}' failed: {source}")]
    Connection {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("Handshake with provider '{provider}' failed: {source}")]
    Handshake {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("Unknown tool: {0}")]
    Routing(String),

    #[error("Remote tool call '{tool}' on provider '{provider}' failed: {source}")]
    RemoteTool {
        provider: String,
        tool: String,
        #[source]
        source: TransportError,
    },

    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Carrier error: {0}")]
    Carrier(#[source] CarrierError),
}

impl BridgeError {
    /// Create a connection error.
    pub fn connection(provider: impl Into<String>, source: TransportError) -> Self {
        Self::Connection {
            provider: provider.into(),
            source,
        }
    }

    /// Create a handshake error.
    pub fn handshake(provider: impl Into<String>, source: TransportError) -> Self {
        Self::Handshake {
            provider: provider.into(),
            source,
        }
    }

    /// Create a remote tool error.
    pub fn remote_tool(
        provider: impl Into<String>,
        tool: impl Into<String>,
        source: TransportError,
    ) -> Self {
        Self::RemoteTool {
            provider: provider.into(),
            tool: tool.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Handshake { .. } => ErrorKind::Handshake,
            Self::Routing(_) => ErrorKind::Routing,
            Self::RemoteTool { .. } => ErrorKind::RemoteTool,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Carrier(_) => ErrorKind::Carrier,
        }
    }

    /// Check if retrying the same operation may succeed.
    ///
    /// A tool that reported its own failure is not retryable; a call that
    /// never reached the provider is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::RemoteTool { source, .. } => !matches!(source, TransportError::ToolReported(_)),
            _ => false,
        }
    }

    /// Attach an operation label to a timeout produced by the carrier.
    pub(crate) fn label_timeout(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Timeout { timeout, .. } => Self::Timeout {
                operation: operation.into(),
                timeout,
            },
            other => other,
        }
    }
}

impl From<CarrierError> for BridgeError {
    fn from(err: CarrierError) -> Self {
        match err {
            CarrierError::TimedOut(timeout) => Self::Timeout {
                operation: "operation".to_string(),
                timeout,
            },
            other => Self::Carrier(other),
        }
    }
}

/// One provider's failure inside a bulk operation.
#[derive(Debug)]
pub struct ProviderFailure {
    /// Provider name.
    pub provider: String,
    /// The failure.
    pub error: BridgeError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Failures collected by a bulk operation that attempted every provider.
#[derive(Error, Debug)]
#[error("{operation} failed for {} provider(s): {}", .failures.len(), summarize(.failures))]
pub struct AggregateError {
    /// The bulk operation (`connect_all`, `disconnect_all`, `shutdown`).
    pub operation: &'static str,
    /// Failures in the order they were observed.
    pub failures: Vec<ProviderFailure>,
}

impl AggregateError {
    /// Create an aggregate for a bulk operation.
    pub fn new(operation: &'static str, failures: Vec<ProviderFailure>) -> Self {
        Self { operation, failures }
    }

    /// The first failure observed.
    pub fn first(&self) -> Option<&ProviderFailure> {
        self.failures.first()
    }

    /// Names of the providers that failed, in order.
    pub fn providers(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.provider.as_str()).collect()
    }

    /// Check if any failure is a leaked background thread.
    pub fn has_carrier_fault(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.error.kind() == ErrorKind::Carrier)
    }
}

fn summarize(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
