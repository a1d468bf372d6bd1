// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport error types.

use thiserror::Error;

/// Errors raised by a provider connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("Failed to connect to '{target}': {message}")]
    ConnectionFailed { target: String, message: String },

    /// The provider answered with a JSON-RPC error.
    #[error("Protocol error: code={code}, message={message}")]
    Protocol { code: i32, message: String },

    /// The provider answered with something that is not a valid response.
    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    /// The tool ran and reported failure (`isError`).
    #[error("Tool reported failure: {0}")]
    ToolReported(String),

    /// The connection was closed before a response arrived.
    #[error("Connection closed")]
    Closed,

    /// The provider configuration is unusable for this transport.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Create a connection failed error.
    pub fn connection_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(code: i32, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}
