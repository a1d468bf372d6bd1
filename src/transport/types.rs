// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool and content types exchanged with providers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool discovered on a provider during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its provider.
    pub name: String,

    /// Tool description (empty when the provider sends none).
    #[serde(default)]
    pub description: String,

    /// JSON Schema for tool input.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,

    /// Provider this tool belongs to.
    pub provider: String,

    /// Whether the tool only reads state.
    #[serde(default)]
    pub read_only: bool,

    /// Whether the tool may destroy state.
    #[serde(default)]
    pub destructive: bool,

    /// Whether repeated calls with the same arguments are safe.
    #[serde(default)]
    pub idempotent: bool,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    /// Create a descriptor with an empty description and an empty object schema.
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: empty_object_schema(),
            provider: provider.into(),
            read_only: false,
            destructive: false,
            idempotent: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Describe this tool in the chat-completion `function` format.
    pub fn to_function_spec(&self) -> Value {
        let parameters = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            empty_object_schema()
        };

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result content blocks.
    #[serde(default)]
    pub content: Vec<Content>,

    /// Structured result, when the provider sends one.
    #[serde(default, rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,

    /// Whether the provider reported failure.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            structured: None,
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            structured: None,
            is_error: true,
        }
    }

    /// Get the text content as a single string.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                Content::Resource { resource } => resource.text.as_deref(),
                Content::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content blocks returned by tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content.
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContent,
    },
}

impl Content {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Contents of an embedded resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    /// URI of the resource.
    pub uri: String,

    /// Optional MIME type.
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Optional text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Server capabilities reported during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Whether the server supports tools.
    #[serde(default)]
    pub tools: bool,

    /// Whether the server supports resources.
    #[serde(default)]
    pub resources: bool,

    /// Whether the server supports prompts.
    #[serde(default)]
    pub prompts: bool,

    /// Whether the server supports logging.
    #[serde(default)]
    pub logging: bool,
}

impl ServerCapabilities {
    /// Read capability flags from an `initialize` result's `capabilities` object.
    pub fn from_value(value: &Value) -> Self {
        let has = |key: &str| value.get(key).is_some_and(|v| !v.is_null());
        Self {
            tools: has("tools"),
            resources: has("resources"),
            prompts: has("prompts"),
            logging: has("logging"),
        }
    }
}

/// Server information reported during initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,

    /// Protocol version negotiated.
    #[serde(default)]
    pub protocol_version: Option<String>,

    /// Usage instructions sent by the server.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            capabilities: ServerCapabilities::default(),
            protocol_version: None,
            instructions: None,
        }
    }
}
