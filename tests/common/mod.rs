// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process providers for integration tests.
//!
//! A [`FakeConnector`] serves a scripted set of providers without spawning
//! processes or opening sockets. Every open and close is recorded so tests
//! can check ordering across providers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use toolbridge::transport::{Content, ServerInfo};
use toolbridge::{
    BridgeConfig, Connection, Connector, Handshake, ProviderConfig, ToolDescriptor, ToolOutput,
    TransportError,
};

/// Tool that never completes.
pub const HANG_TOOL: &str = "hang";

/// Tool that reports failure through the result.
pub const FAIL_TOOL: &str = "fail";

/// Lifecycle events observed by a [`FakeConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Initialize(String),
    Close(String),
}

/// Behaviour of one fake provider.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    pub tools: Vec<String>,
    pub refuse_open: bool,
    pub fail_initialize: bool,
    pub fail_close: bool,
    pub call_delay: Option<Duration>,
}

impl FakeProvider {
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_open: true,
            ..Default::default()
        }
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }
}

/// Connector serving [`FakeProvider`]s by name.
#[derive(Default)]
pub struct FakeConnector {
    providers: HashMap<String, FakeProvider>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, name: &str, provider: FakeProvider) -> Self {
        self.providers.insert(name.to_string(), provider);
        self
    }

    /// Shared handle on the recorded events.
    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.events)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        provider: &str,
        _config: &ProviderConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let behaviour = self
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| TransportError::connection_failed(provider, "unknown provider"))?;
        if behaviour.refuse_open {
            return Err(TransportError::connection_failed(provider, "connection refused"));
        }

        self.events.lock().push(Event::Open(provider.to_string()));
        Ok(Box::new(FakeConnection {
            provider: provider.to_string(),
            behaviour,
            events: Arc::clone(&self.events),
        }))
    }
}

struct FakeConnection {
    provider: String,
    behaviour: FakeProvider,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn initialize(&self) -> Result<Handshake, TransportError> {
        self.events.lock().push(Event::Initialize(self.provider.clone()));
        if self.behaviour.fail_initialize {
            return Err(TransportError::protocol(-32603, "initialize rejected"));
        }

        let tools = self
            .behaviour
            .tools
            .iter()
            .map(|name| {
                ToolDescriptor::new(name.as_str(), self.provider.as_str())
                    .with_description(format!("{name} from {}", self.provider))
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {"value": {"type": "string"}}
                    }))
            })
            .collect();

        Ok(Handshake {
            server_info: ServerInfo {
                name: format!("fake-{}", self.provider),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            tools,
        })
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutput, TransportError> {
        if let Some(delay) = self.behaviour.call_delay {
            tokio::time::sleep(delay).await;
        }

        match tool {
            HANG_TOOL => std::future::pending().await,
            FAIL_TOOL => Ok(ToolOutput::error(format!("{tool} failed on {}", self.provider))),
            _ => {
                let thread = std::thread::current().name().unwrap_or_default().to_string();
                Ok(ToolOutput {
                    content: vec![Content::text(format!("{}:{tool}", self.provider))],
                    structured: Some(json!({
                        "provider": self.provider,
                        "tool": tool,
                        "args": args,
                        "thread": thread,
                    })),
                    is_error: false,
                })
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.events.lock().push(Event::Close(self.provider.clone()));
        if self.behaviour.fail_close {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

/// Configuration naming `providers` in order, each with short timeouts.
pub fn bridge_config(providers: &[&str]) -> BridgeConfig {
    providers.iter().fold(BridgeConfig::new(), |config, name| {
        config.with_provider(
            *name,
            ProviderConfig::stdio("fake")
                .with_startup_timeout_sec(5)
                .with_tool_timeout_sec(5),
        )
    })
}

/// Opens and closes in the order they were recorded, as `(kind, provider)`.
pub fn open_close_sequence(events: &[Event]) -> Vec<(&'static str, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Open(p) => Some(("open", p.clone())),
            Event::Close(p) => Some(("close", p.clone())),
            Event::Initialize(_) => None,
        })
        .collect()
}
