// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is POSTed to the provider URL. The provider answers
//! with either a JSON body or an SSE stream carrying the response. The
//! `Mcp-Session-Id` header returned by `initialize` is echoed on every later
//! request, and `close` ends the session with a DELETE.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;

use crate::config::ProviderConfig;

use super::error::TransportError;
use super::jsonrpc::{self, RpcChannel};
use super::types::ToolOutput;
use super::{Connection, Connector, Handshake};

/// Session header defined by the streamable HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Accept header value for POSTs.
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Opens [`HttpConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn open(
        &self,
        provider: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        Ok(Box::new(HttpConnection::new(provider, config)?))
    }
}

/// A streamable HTTP session with one provider.
pub struct HttpConnection {
    /// Provider name.
    provider: String,
    /// Endpoint URL.
    url: Url,
    /// HTTP client carrying the configured headers.
    client: Client,
    /// Session id assigned by the provider.
    session_id: Mutex<Option<String>>,
    /// Request ID counter.
    request_id: AtomicU64,
    /// Set once `close` has run.
    closed: AtomicBool,
}

impl HttpConnection {
    /// Build a connection from provider configuration. No request is sent.
    pub fn new(provider: &str, config: &ProviderConfig) -> Result<Self, TransportError> {
        let raw = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TransportError::Config("http transport requires a url".to_string()))?;
        let url = Url::parse(raw)
            .map_err(|e| TransportError::Config(format!("invalid url '{raw}': {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in config.expanded_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::Config(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }
        if let Some(token) = config.expanded_bearer_token().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Config(format!("invalid bearer token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::connection_failed(url.as_str(), e.to_string()))?;

        Ok(Self {
            provider: provider.to_string(),
            url,
            client,
            session_id: Mutex::new(None),
            request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Session id assigned by the provider, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, message: &Value) -> Result<Response, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, ACCEPT_BOTH)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(message)?);
        if let Some(id) = self.session_id() {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::connection_failed(self.url.as_str(), e.to_string()))?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::connection_failed(
                self.url.as_str(),
                format!("HTTP {status}: {}", body.trim()),
            ));
        }
        Ok(response)
    }

    /// Read the response with `id` from a JSON body or an SSE stream.
    async fn read_response(&self, mut response: Response, id: u64) -> Result<Value, TransportError> {
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_sse {
            let body: Value = response.json().await?;
            return find_response(body, id)
                .ok_or_else(|| TransportError::invalid(format!("no response with id {id} in body")));
        }

        let mut events = SseBuffer::default();
        while let Some(chunk) = response.chunk().await? {
            for data in events.push(&chunk) {
                match serde_json::from_str::<Value>(&data) {
                    Ok(message) => {
                        if let Some(found) = find_response(message, id) {
                            return Ok(found);
                        }
                    }
                    Err(_) => {
                        tracing::debug!(provider = %self.provider, "ignoring non-JSON SSE event");
                    }
                }
            }
        }

        Err(TransportError::invalid(format!(
            "event stream ended without a response to request {id}"
        )))
    }
}

/// Pick the response with `id` out of a message or a batch.
fn find_response(message: Value, id: u64) -> Option<Value> {
    match message {
        Value::Array(batch) => batch
            .into_iter()
            .find(|m| jsonrpc::response_id(m) == Some(id)),
        single if jsonrpc::response_id(&single) == Some(id) => Some(single),
        _ => None,
    }
}

/// Incremental SSE parser yielding the `data` payload of each event.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across chunks is decoded intact.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseBuffer {
    /// Feed bytes; return payloads of every event completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }
}

#[async_trait]
impl RpcChannel for HttpConnection {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&jsonrpc::request(id, method, params)).await?;
        let message = self.read_response(response, id).await?;
        jsonrpc::into_result(message)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.post(&jsonrpc::notification(method, params)).await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn initialize(&self) -> Result<Handshake, TransportError> {
        jsonrpc::handshake(self, &self.provider).await
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutput, TransportError> {
        jsonrpc::call_tool(self, tool, args).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(id) = self.session_id.lock().take() else {
            return Ok(());
        };

        let response = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, id)
            .send()
            .await?;

        match response.status() {
            // Servers may not allow clients to end sessions.
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(TransportError::connection_failed(
                self.url.as_str(),
                format!("session DELETE returned HTTP {status}"),
            )),
        }
    }
}
