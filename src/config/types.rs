// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider configuration types.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "browser": {
//!       "url": "http://localhost:8931/mcp"
//!     },
//!     "filesystem": {
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!       "tool_timeout_sec": 60,
//!       "disabled_tools": ["write_file"]
//!     },
//!     "github": {
//!       "url": "https://mcp.github.com/v1",
//!       "bearer_token": "${GITHUB_TOKEN}",
//!       "enabled_tools": ["get_issue", "create_pr"]
//!     }
//!   }
//! }
//! ```
//!
//! Providers keep the order in which they appear in the document; that order
//! drives connection order and tool-name collision resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Default startup (connect + handshake) timeout in seconds.
pub const DEFAULT_STARTUP_TIMEOUT_SEC: u64 = 30;

/// Default tool call timeout in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SEC: u64 = 300;

/// Configuration for every tool provider, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Provider name to provider configuration, in declaration order.
    #[serde(
        default,
        rename = "mcpServers",
        alias = "mcp_servers",
        alias = "providers",
        serialize_with = "serialize_ordered",
        deserialize_with = "deserialize_ordered"
    )]
    pub providers: Vec<(String, ProviderConfig)>,
}

impl BridgeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Append a provider, replacing an existing one with the same name in place.
    pub fn add_provider(&mut self, name: impl Into<String>, config: ProviderConfig) {
        let name = name.into();
        match self.providers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = config,
            None => self.providers.push((name, config)),
        }
    }

    /// Builder form of [`add_provider`](Self::add_provider).
    pub fn with_provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.add_provider(name, config);
        self
    }

    /// Remove a provider configuration.
    pub fn remove_provider(&mut self, name: &str) -> Option<ProviderConfig> {
        let index = self.providers.iter().position(|(n, _)| n == name)?;
        Some(self.providers.remove(index).1)
    }

    /// Get a provider configuration by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Enabled providers, in declaration order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(n, c)| (n, c))
    }

    /// Check every enabled provider has what its transport needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in self.enabled_providers() {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("mcpServers", "provider name is empty"));
            }
            config.validate(name)?;
        }
        Ok(())
    }
}

fn serialize_ordered<S>(providers: &[(String, ProviderConfig)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(providers.len()))?;
    for (name, config) in providers {
        map.serialize_entry(name, config)?;
    }
    map.end()
}

fn deserialize_ordered<'de, D>(deserializer: D) -> Result<Vec<(String, ProviderConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedVisitor;

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = Vec<(String, ProviderConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of provider name to provider configuration")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut providers: Vec<(String, ProviderConfig)> =
                Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, config)) = access.next_entry::<String, ProviderConfig>()? {
                // Duplicate keys: the later definition wins, at the earlier position.
                match providers.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = config,
                    None => providers.push((name, config)),
                }
            }
            Ok(providers)
        }
    }

    deserializer.deserialize_map(OrderedVisitor)
}

/// Configuration for a single tool provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Transport type. Inferred from `url` / `command` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportType>,

    /// Whether this provider is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Connect and handshake timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: u64,

    /// Tool call timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_sec: u64,

    /// List of enabled tools (if empty, all tools are enabled).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,

    /// List of disabled tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,

    /// Endpoint URL for HTTP transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer token for HTTP transport (supports ${ENV_VAR} expansion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// Extra HTTP headers (values support ${ENV_VAR} expansion).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Command for stdio transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for stdio transport.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables for stdio transport.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for stdio transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SEC
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SEC
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            transport: None,
            enabled: true,
            startup_timeout_sec: DEFAULT_STARTUP_TIMEOUT_SEC,
            tool_timeout_sec: DEFAULT_TOOL_TIMEOUT_SEC,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            url: None,
            bearer_token: None,
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

impl ProviderConfig {
    /// Create an HTTP transport configuration.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: Some(TransportType::Http),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Create a stdio transport configuration.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            transport: Some(TransportType::Stdio),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set enabled tools.
    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set disabled tools.
    pub fn with_disabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.disabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set startup timeout in seconds.
    pub fn with_startup_timeout_sec(mut self, secs: u64) -> Self {
        self.startup_timeout_sec = secs;
        self
    }

    /// Set tool call timeout in seconds.
    pub fn with_tool_timeout_sec(mut self, secs: u64) -> Self {
        self.tool_timeout_sec = secs;
        self
    }

    /// Resolve the transport, inferring it from `url` / `command` when unset.
    pub fn transport_type(&self) -> TransportType {
        match self.transport {
            Some(transport) => transport,
            None if self.command.is_some() && self.url.is_none() => TransportType::Stdio,
            None => TransportType::Http,
        }
    }

    /// Startup timeout as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_sec)
    }

    /// Tool call timeout as a duration.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_sec)
    }

    /// Check if a tool is enabled.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }

        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    /// Bearer token with `${VAR}` references expanded.
    pub fn expanded_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_deref().map(expand_env_vars)
    }

    /// Headers with `${VAR}` references expanded in their values.
    pub fn expanded_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    /// Check the fields the resolved transport needs are present.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let missing = |field: &str| {
            ConfigError::invalid(
                format!("mcpServers.{name}.{field}"),
                format!("required for {} transport", self.transport_type()),
            )
        };

        match self.transport_type() {
            TransportType::Http if self.url.as_deref().map_or(true, str::is_empty) => {
                Err(missing("url"))
            }
            TransportType::Stdio if self.command.as_deref().map_or(true, str::is_empty) => {
                Err(missing("command"))
            }
            _ if self.startup_timeout_sec == 0 => Err(ConfigError::invalid(
                format!("mcpServers.{name}.startup_timeout_sec"),
                "must be greater than zero",
            )),
            _ if self.tool_timeout_sec == 0 => Err(ConfigError::invalid(
                format!("mcpServers.{name}.tool_timeout_sec"),
                "must be greater than zero",
            )),
            _ => Ok(()),
        }
    }
}

/// Expand `${VAR}` references from the process environment. Unset variables
/// expand to the empty string.
pub fn expand_env_vars(value: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    });

    pattern
        .replace_all(value, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Transport type for a provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Streamable HTTP transport.
    #[serde(alias = "streamable_http", alias = "streamable-http")]
    Http,

    /// Stdio transport (child process).
    Stdio,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}
