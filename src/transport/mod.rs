// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider connections.
//!
//! Sessions reach providers only through the [`Connector`] and
//! [`Connection`] traits. Two implementations ship with the crate:
//!
//! - [`stdio::StdioConnector`]: child process, newline-delimited JSON-RPC
//! - [`http::HttpConnector`]: streamable HTTP
//!
//! [`TransportConnector`] picks between them from the provider's
//! [`TransportType`].
//!
//! Every method is awaited on the owning session's carrier thread, so
//! connections may spawn tasks onto the current runtime freely.

pub mod error;
pub mod http;
pub mod jsonrpc;
pub mod stdio;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ProviderConfig, TransportType};

pub use error::TransportError;
pub use types::{Content, ResourceContent, ServerCapabilities, ServerInfo, ToolDescriptor, ToolOutput};

/// Result of the protocol handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handshake {
    /// Information the provider reported about itself.
    pub server_info: ServerInfo,
    /// Every tool the provider offers.
    pub tools: Vec<ToolDescriptor>,
}

/// Opens connections to providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the underlying stream to `provider`. No handshake is performed.
    async fn open(
        &self,
        provider: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open connection to one provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run the protocol handshake and discover tools.
    async fn initialize(&self) -> Result<Handshake, TransportError>;

    /// Invoke a tool. A tool-reported failure is returned as an output with
    /// `is_error` set, not as an error.
    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutput, TransportError>;

    /// End the protocol session, then release the stream.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Dispatches to the built-in connector for each [`TransportType`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportConnector;

impl TransportConnector {
    /// The connector registered for `transport`.
    pub fn for_transport(transport: TransportType) -> &'static dyn Connector {
        match transport {
            TransportType::Http => &http::HttpConnector,
            TransportType::Stdio => &stdio::StdioConnector,
        }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn open(
        &self,
        provider: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let transport = config.transport_type();
        tracing::debug!(provider = %provider, %transport, "opening provider connection");
        Self::for_transport(transport).open(provider, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_uses_configured_transport() {
        // An http config without a url fails inside the http connector.
        let config = ProviderConfig {
            transport: Some(TransportType::Http),
            ..Default::default()
        };
        let err = TransportConnector.open("p", &config).await.err().unwrap();
        assert!(err.to_string().contains("http transport requires a url"));

        let config = ProviderConfig {
            transport: Some(TransportType::Stdio),
            ..Default::default()
        };
        let err = TransportConnector.open("p", &config).await.err().unwrap();
        assert!(err.to_string().contains("stdio transport requires a command"));
    }

    #[tokio::test]
    async fn test_http_open_sends_nothing() {
        let config = ProviderConfig::http("http://127.0.0.1:9/mcp");
        assert!(TransportConnector.open("p", &config).await.is_ok());
    }
}
